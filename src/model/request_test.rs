//! Tests for the request value object.

#[cfg(test)]
mod tests {
    use crate::model::{Method, Request};
    use crate::resolver::HostStateMask;

    #[test]
    fn test_builder_defaults() {
        let req = Request::get("/registrations/user1");
        assert_eq!(req.method(), Method::Get);
        assert_eq!(req.path(), "/registrations/user1");
        assert!(req.body().is_none());
        assert!(req.headers().is_empty());
        assert_eq!(req.host_state(), HostStateMask::all());
        assert_eq!(req.trail(), 0);
    }

    #[test]
    fn test_empty_body_is_treated_as_absent() {
        let req = Request::put("/x").with_body("");
        assert!(req.body().is_none());
    }

    #[test]
    fn test_headers_keep_insertion_order() {
        let req = Request::post("/x")
            .with_header("X-First", "1")
            .with_header("X-Second", "2");
        let names: Vec<&str> = req.headers().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["X-First", "X-Second"]);
    }

    #[test]
    fn test_method_verbs() {
        assert_eq!(Method::Get.as_str(), "GET");
        assert_eq!(Method::Put.as_str(), "PUT");
        assert_eq!(Method::Post.as_str(), "POST");
        assert_eq!(Method::Delete.as_str(), "DELETE");
    }
}
