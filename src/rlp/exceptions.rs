
#[derive(Debug, PartialEq)]
/// Common base class for all RLP exceptions.
pub enum RlpException {
    /// Indicates that RLP decoding failed.
    DecodingError(&'static str),
    /// Indicates that RLP encoding failed.
    EncodingError(&'static str),
}
