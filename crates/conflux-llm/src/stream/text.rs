/// Running text of one streamed turn
#[derive(Debug, Default)]
pub struct TextAccumulator {
    text: String,
}

impl TextAccumulator {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the text carried by one vendor event and return the delta
    ///
    /// The delta is the suffix of the accumulated text beyond its previous
    /// length, so concatenating every returned delta reproduces `text()`
    /// exactly. An empty event yields an empty delta.
    pub fn push(&mut self, new_text: &str) -> String {
        let previous = self.text.len();
        self.text.push_str(new_text);
        self.text[previous..].to_owned()
    }

    /// Full text accumulated so far
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether nothing has been accumulated
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}
