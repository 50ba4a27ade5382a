use std::{convert::Infallible, string::String};

/// Console that records everything written to it.
#[derive(Clone, Debug, Default)]
pub struct MockConsole {
    pub written: String,
}

impl MockConsole {
    pub fn text(&self) -> &str { &self.written }
    pub fn lines(&self) -> impl Iterator<Item = &str> { self.written.lines() }
    pub fn clear(&mut self) { self.written.clear() }
}

impl ufmt::uWrite for MockConsole {
    type Error = Infallible;
    fn write_str(&mut self, s: &str) -> Result<(), Self::Error> {
        self.written.push_str(s);
        Ok(())
    }
}
