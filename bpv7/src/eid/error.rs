use super::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EidError {
    #[error("Only node.service components are supported in an ipn URI")]
    IpnInvalidComponents,

    #[error("Missing scheme separator")]
    MissingScheme,

    #[error("Unknown EID scheme {0}")]
    UnknownScheme(String),

    #[error("Unsupported EID scheme {0}")]
    UnsupportedScheme(u64),

    #[error("Failed to parse {field}: {source}")]
    InvalidField {
        field: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    InvalidCBOR(#[from] bpcore_cbor::decode::Error),
}

pub trait CaptureFieldErr<T> {
    fn map_field_err(self, field: &'static str) -> Result<T, EidError>;
}

impl<T, E: Into<Box<dyn std::error::Error + Send + Sync>>> CaptureFieldErr<T>
    for std::result::Result<T, E>
{
    fn map_field_err(self, field: &'static str) -> Result<T, EidError> {
        self.map_err(|e| EidError::InvalidField {
            field,
            source: e.into(),
        })
    }
}
