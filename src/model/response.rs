use bytes::Bytes;
use std::collections::HashMap;

/// Status value meaning "not yet sent". Never escapes a normal return from
/// the executor.
pub const STATUS_NOT_SENT: u16 = 0;

/// The outcome of one executed call: final status code, response body and
/// the parsed response headers.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: Bytes,
    headers: HashMap<String, String>,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: STATUS_NOT_SENT,
            body: Bytes::new(),
            headers: HashMap::new(),
        }
    }
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
            headers: HashMap::new(),
        }
    }

    /// Ingests one raw header line. The key is lowercased and both key and
    /// value have all whitespace removed; a line without a colon becomes a
    /// key with an empty value; duplicate keys overwrite (last wins).
    pub fn push_header_line(&mut self, line: &str) {
        let (key, value) = match line.find(':') {
            Some(idx) => (&line[..idx], &line[idx + 1..]),
            None => (line, ""),
        };

        let key: String = key
            .chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(|c| c.to_lowercase())
            .collect();
        let value: String = value.chars().filter(|c| !c.is_whitespace()).collect();

        if key.is_empty() {
            return;
        }
        self.headers.insert(key, value);
    }

    /// Looks a header up by (lowercased) name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|v| v.as_str())
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn is_ok(&self) -> bool {
        self.status < 400 && self.status != STATUS_NOT_SENT
    }
}
