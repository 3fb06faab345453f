use super::*;
use error::CaptureFieldErr;

mod error;

#[cfg(test)]
mod cbor_tests;

#[cfg(test)]
mod str_tests;

pub use error::EidError;

/// A Bundle Protocol endpoint identifier.
///
/// Scheme 2 (`ipn`) is the only non-null scheme this crate understands; any
/// other scheme number parsed off the wire is rejected rather than retained,
/// since nothing downstream of the cache/route table can act on it.
#[derive(Default, Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum Eid {
    #[default]
    Null,
    Ipn {
        node_number: u64,
        service_number: u64,
    },
}

impl Eid {
    pub fn node_number(&self) -> Option<u64> {
        match self {
            Eid::Null => None,
            Eid::Ipn { node_number, .. } => Some(*node_number),
        }
    }
}

impl bpcore_cbor::encode::ToCbor for Eid {
    type Result = ();

    fn to_cbor(&self, encoder: &mut bpcore_cbor::encode::Encoder) -> Self::Result {
        encoder.emit_array(Some(2), |a| match self {
            Eid::Null => {
                a.emit(&1u64);
                a.emit(&0u64);
            }
            Eid::Ipn {
                node_number,
                service_number,
            } => {
                a.emit(&2u64);
                a.emit_array(Some(2), |a| {
                    a.emit(node_number);
                    a.emit(service_number);
                });
            }
        })
    }
}

impl bpcore_cbor::decode::FromCbor for Eid {
    type Error = EidError;

    fn from_cbor(data: &[u8]) -> Result<(Self, bool, usize), Self::Error> {
        bpcore_cbor::decode::parse_array(data, |a, shortest, _tags| {
            let scheme: u64 = a.parse().map_field_err("EID scheme")?;
            match scheme {
                1 => {
                    let ssp: u64 = a.parse().map_field_err("dtn:none SSP")?;
                    if ssp != 0 {
                        return Err(EidError::UnsupportedScheme(1));
                    }
                    Ok((Eid::Null, shortest))
                }
                2 => {
                    let ((node_number, service_number), _) = a.parse_array(|a, _, _| {
                        let node_number: u64 = a.parse().map_field_err("IPN node number")?;
                        let service_number: u64 = a.parse().map_field_err("IPN service number")?;
                        Ok::<_, EidError>((node_number, service_number))
                    })?;
                    Ok((
                        Eid::Ipn {
                            node_number,
                            service_number,
                        },
                        shortest,
                    ))
                }
                scheme => Err(EidError::UnsupportedScheme(scheme)),
            }
        })
        .map(|((eid, shortest), len)| (eid, shortest, len))
    }
}

impl core::str::FromStr for Eid {
    type Err = EidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((scheme, ssp)) = s.split_once(':') else {
            return Err(EidError::MissingScheme);
        };
        match scheme {
            "dtn" if ssp == "none" => Ok(Eid::Null),
            "ipn" => {
                let ssp = ssp.trim_start_matches("//");
                let parts: Vec<&str> = ssp.split('.').collect();
                let (node_number, service_number) = match parts.as_slice() {
                    [node, service] => (
                        node.parse().map_field_err("IPN node number")?,
                        service.parse().map_field_err("IPN service number")?,
                    ),
                    _ => return Err(EidError::IpnInvalidComponents),
                };
                Ok(Eid::Ipn {
                    node_number,
                    service_number,
                })
            }
            _ => Err(EidError::UnknownScheme(scheme.to_string())),
        }
    }
}

impl core::fmt::Display for Eid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Eid::Null => f.write_str("dtn:none"),
            Eid::Ipn {
                node_number,
                service_number,
            } => write!(f, "ipn:{node_number}.{service_number}"),
        }
    }
}
