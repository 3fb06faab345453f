/*!
This module defines the BPv7 primary block (RFC 9171 Section 4.3.1), the
single mandatory block every bundle carries first.
*/

use super::*;
use core::ops::Range;
use error::CaptureFieldErr;

/// The BPv7 primary block (RFC 9171 Section 4.3.1).
///
/// Every bundle has exactly one primary block, and it is always the first
/// block in the bundle's canonical encoding.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PrimaryBlock {
    pub flags: Flags,
    pub crc_type: crc::CrcType,
    pub destination: eid::Eid,
    pub id: bundle::Id,
    pub report_to: eid::Eid,
    pub lifetime: u64,
    /// The range of bytes in the source data that this block occupies.
    pub extent: Range<usize>,
}

/// Bundle Protocol version this core implements.
const BP_VERSION: u64 = 7;

impl PrimaryBlock {
    pub(crate) fn emit(&mut self, array: &mut bpcore_cbor::encode::Array) -> Result<(), Error> {
        self.extent = array.emit(&bpcore_cbor::encode::Raw(&crc::append_crc_value(
            self.crc_type,
            bpcore_cbor::encode::emit_array(
                Some(primary_block_field_count(self.crc_type, self.id.fragment_info.is_some())),
                |a| {
                    a.emit(&BP_VERSION);
                    a.emit(&self.flags);
                    a.emit(&self.crc_type);
                    a.emit(&self.destination);
                    a.emit(&self.id.source);
                    a.emit(&self.report_to);
                    a.emit(&self.id.timestamp);
                    a.emit(&self.lifetime);
                    if let Some(bundle::FragmentInfo {
                        offset,
                        total_adu_length,
                    }) = &self.id.fragment_info
                    {
                        a.emit(offset);
                        a.emit(total_adu_length);
                    }
                    if let crc::CrcType::None = self.crc_type {
                    } else {
                        a.skip_value();
                    }
                },
            ),
        )?));
        Ok(())
    }
}

fn primary_block_field_count(crc_type: crc::CrcType, fragmented: bool) -> usize {
    let mut count = 8;
    if fragmented {
        count += 2;
    }
    if !matches!(crc_type, crc::CrcType::None) {
        count += 1;
    }
    count
}

impl bpcore_cbor::decode::FromCbor for PrimaryBlock {
    type Error = Error;

    fn from_cbor(data: &[u8]) -> Result<(Self, bool, usize), Self::Error> {
        bpcore_cbor::decode::parse_array(data, |array, mut shortest, tags| {
            shortest = shortest && tags.is_empty() && array.is_definite();

            let (version, s) = array.parse().map_field_err("version")?;
            shortest = shortest && s;
            if version != BP_VERSION {
                return Err(Error::InvalidVersion(version));
            }

            let (flags, s): (Flags, bool) = array.parse().map_field_err("bundle flags")?;
            shortest = shortest && s;

            let (crc_type, s) = array.parse().map_field_err("CRC type")?;
            shortest = shortest && s;

            let (destination, s) = array.parse().map_field_err("destination EID")?;
            shortest = shortest && s;

            let (source, s) = array.parse().map_field_err("source EID")?;
            shortest = shortest && s;

            let (report_to, s) = array.parse().map_field_err("report-to EID")?;
            shortest = shortest && s;

            let (timestamp, s): (creation_timestamp::CreationTimestamp, bool) =
                array.parse().map_field_err("creation timestamp")?;
            shortest = shortest && s;

            let (lifetime, s) = array.parse().map_field_err("lifetime")?;
            shortest = shortest && s;

            let fragment_info = if flags.is_fragment {
                let (offset, s) = array.parse().map_field_err("fragment offset")?;
                shortest = shortest && s;
                let (total_adu_length, s) = array.parse().map_field_err("total ADU length")?;
                shortest = shortest && s;
                Some(bundle::FragmentInfo {
                    offset,
                    total_adu_length,
                })
            } else {
                None
            };

            shortest = crc::parse_crc_value(data, array, crc_type)? && shortest;

            Ok((
                PrimaryBlock {
                    flags,
                    crc_type,
                    destination,
                    id: bundle::Id {
                        source,
                        timestamp,
                        fragment_info,
                    },
                    report_to,
                    lifetime,
                    extent: 0..0,
                },
                shortest,
            ))
        })
        .map(|((mut v, s), len)| {
            v.extent.end = len;
            (v, s, len)
        })
    }
}
