#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FakeError;
