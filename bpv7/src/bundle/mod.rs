/*!
This module defines the core `Bundle` structure and its components, providing the
primary interface for creating and parsing BPv7 bundles. It orchestrates the
various parts of a bundle, from the primary block to extension blocks and payload.
*/

use super::*;
use base64::prelude::*;

mod primary_block;

/// Holds fragmentation information for a bundle.
///
/// As defined in RFC 9171 Section 4.2.1, this information is present in the
/// primary block if the bundle is a fragment of a larger original bundle.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FragmentInfo {
    /// The offset of this fragment's payload within the original bundle's payload.
    pub offset: u64,
    /// The total length of the original bundle's payload.
    pub total_adu_length: u64,
}

/// Contains the [`Id`] struct for uniquely identifying a bundle and related helpers.
pub mod id {
    use super::*;
    use thiserror::Error;

    /// Errors that can occur when parsing a bundle [`Id`] from a key.
    #[derive(Error, Debug)]
    pub enum Error {
        /// The key string is malformed and cannot be parsed.
        #[error("Bad bundle id key")]
        BadKey,

        /// The key is not valid Base64.
        #[error("Bad base64 encoding: {0}")]
        BadBase64(base64::DecodeError),

        /// A field within the decoded CBOR data is invalid.
        #[error("Failed to decode {field}: {source}")]
        InvalidField {
            field: &'static str,
            source: Box<dyn core::error::Error + Send + Sync>,
        },

        /// An error occurred during CBOR decoding.
        #[error(transparent)]
        InvalidCBOR(#[from] bpcore_cbor::decode::Error),
    }
}

trait CaptureFieldIdErr<T> {
    fn map_field_id_err(self, field: &'static str) -> Result<T, id::Error>;
}

impl<T, E: Into<Box<dyn core::error::Error + Send + Sync>>> CaptureFieldIdErr<T>
    for core::result::Result<T, E>
{
    fn map_field_id_err(self, field: &'static str) -> Result<T, id::Error> {
        self.map_err(|e| id::Error::InvalidField {
            field,
            source: e.into(),
        })
    }
}

/// Represents the unique identifier of a BPv7 bundle.
///
/// A bundle ID is a tuple of `(source EID, creation timestamp, fragment info)`.
/// This combination is guaranteed to be unique across the DTN.
#[derive(Default, Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Id {
    /// The EID of the node that created the bundle.
    pub source: eid::Eid,
    /// The creation timestamp, including a sequence number for uniqueness.
    pub timestamp: creation_timestamp::CreationTimestamp,
    /// Fragmentation information, if this bundle is a fragment.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub fragment_info: Option<FragmentInfo>,
}

impl Id {
    /// Deserializes a bundle ID from a compact, base64-encoded string representation.
    ///
    /// This is useful for using the bundle ID as a key in databases or other systems.
    pub fn from_key(k: &str) -> Result<Self, id::Error> {
        bpcore_cbor::decode::parse_array(
            &BASE64_STANDARD_NO_PAD
                .decode(k)
                .map_err(id::Error::BadBase64)?,
            |array, _, _| {
                let source = array.parse().map_field_id_err("source EID")?;
                let timestamp = array.parse().map_field_id_err("creation timestamp")?;
                let offset: Option<u64> = array.try_parse().map_field_id_err("fragment offset")?;
                let fragment_info = match offset {
                    Some(offset) => Some(FragmentInfo {
                        offset,
                        total_adu_length: array
                            .parse()
                            .map_field_id_err("total application data unit length")?,
                    }),
                    None => None,
                };
                if array.end().map_field_id_err("trailing bundle id data")?.is_none() {
                    Err(id::Error::BadKey)
                } else {
                    Ok(Self {
                        source,
                        timestamp,
                        fragment_info,
                    })
                }
            },
        )
        .map(|v| v.0)
    }

    /// Serializes the bundle ID into a compact, base64-encoded string representation.
    ///
    /// This is useful for using the bundle ID as a key in databases or other systems.
    pub fn to_key(&self) -> String {
        BASE64_STANDARD_NO_PAD.encode(
            if let Some(fragment_info) = &self.fragment_info {
                bpcore_cbor::encode::emit(&(
                    &self.source,
                    &self.timestamp,
                    fragment_info.offset,
                    fragment_info.total_adu_length,
                ))
            } else {
                bpcore_cbor::encode::emit(&(&self.source, &self.timestamp))
            }
            .0,
        )
    }
}

impl core::fmt::Display for Id {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Some(fi) = &self.fragment_info {
            write!(
                f,
                "{}/{} fragment {}/{}",
                self.source, self.timestamp, fi.offset, fi.total_adu_length
            )
        } else {
            write!(f, "{}/{}", self.source, self.timestamp)
        }
    }
}

/// Represents the processing control flags for a BPv7 bundle.
///
/// These flags, defined in RFC 9171 Section 4.2.3, control how a node should
/// handle the bundle, such as whether it can be fragmented or if status reports
/// are requested.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Flags {
    /// If set, this bundle is a fragment of a larger bundle.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "<&bool as core::ops::Not>::not")
    )]
    pub is_fragment: bool,

    /// If set, the payload is an administrative record.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "<&bool as core::ops::Not>::not")
    )]
    pub is_admin_record: bool,

    /// If set, the bundle must not be fragmented.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "<&bool as core::ops::Not>::not")
    )]
    pub do_not_fragment: bool,

    /// If set, the source is requesting that custodians along the path
    /// track and acknowledge custody of the bundle.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "<&bool as core::ops::Not>::not")
    )]
    pub request_custody: bool,

    /// If set, the destination application is requested to send an acknowledgement.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "<&bool as core::ops::Not>::not")
    )]
    pub app_ack_requested: bool,

    /// If set, status reports should include the time of the reported event.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "<&bool as core::ops::Not>::not")
    )]
    pub report_status_time: bool,

    /// If set, a status report should be generated upon bundle reception.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "<&bool as core::ops::Not>::not")
    )]
    pub receipt_report_requested: bool,

    /// If set, a status report should be generated upon bundle forwarding.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "<&bool as core::ops::Not>::not")
    )]
    pub forward_report_requested: bool,

    /// If set, a status report should be generated upon bundle delivery.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "<&bool as core::ops::Not>::not")
    )]
    pub delivery_report_requested: bool,

    /// If set, a status report should be generated upon bundle deletion.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "<&bool as core::ops::Not>::not")
    )]
    pub delete_report_requested: bool,

    /// A bitmask of any unrecognized flags encountered during parsing.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub unrecognised: Option<u64>,
}

impl From<u64> for Flags {
    fn from(value: u64) -> Self {
        let mut flags = Self::default();
        let mut unrecognised = value;

        if (value & (1 << 0)) != 0 {
            flags.is_fragment = true;
            unrecognised &= !(1 << 0);
        }
        if (value & (1 << 1)) != 0 {
            flags.is_admin_record = true;
            unrecognised &= !(1 << 1);
        }
        if (value & (1 << 2)) != 0 {
            flags.do_not_fragment = true;
            unrecognised &= !(1 << 2);
        }
        if (value & (1 << 3)) != 0 {
            flags.request_custody = true;
            unrecognised &= !(1 << 3);
        }
        if (value & (1 << 5)) != 0 {
            flags.app_ack_requested = true;
            unrecognised &= !(1 << 5);
        }
        if (value & (1 << 6)) != 0 {
            flags.report_status_time = true;
            unrecognised &= !(1 << 6);
        }
        if (value & (1 << 14)) != 0 {
            flags.receipt_report_requested = true;
            unrecognised &= !(1 << 14);
        }
        if (value & (1 << 16)) != 0 {
            flags.forward_report_requested = true;
            unrecognised &= !(1 << 16);
        }
        if (value & (1 << 17)) != 0 {
            flags.delivery_report_requested = true;
            unrecognised &= !(1 << 17);
        }
        if (value & (1 << 18)) != 0 {
            flags.delete_report_requested = true;
            unrecognised &= !(1 << 18);
        }

        if unrecognised != 0 {
            flags.unrecognised = Some(unrecognised);
        }
        flags
    }
}

impl From<&Flags> for u64 {
    fn from(value: &Flags) -> Self {
        let mut flags = value.unrecognised.unwrap_or(0);
        if value.is_fragment {
            flags |= 1 << 0;
        }
        if value.is_admin_record {
            flags |= 1 << 1;
        }
        if value.do_not_fragment {
            flags |= 1 << 2;
        }
        if value.request_custody {
            flags |= 1 << 3;
        }
        if value.app_ack_requested {
            flags |= 1 << 5;
        }
        if value.report_status_time {
            flags |= 1 << 6;
        }
        if value.receipt_report_requested {
            flags |= 1 << 14;
        }
        if value.forward_report_requested {
            flags |= 1 << 16;
        }
        if value.delivery_report_requested {
            flags |= 1 << 17;
        }
        if value.delete_report_requested {
            flags |= 1 << 18;
        }
        flags
    }
}

impl bpcore_cbor::encode::ToCbor for Flags {
    type Result = ();

    fn to_cbor(&self, encoder: &mut bpcore_cbor::encode::Encoder) -> Self::Result {
        encoder.emit(&u64::from(self))
    }
}

impl bpcore_cbor::decode::FromCbor for Flags {
    type Error = bpcore_cbor::decode::Error;

    fn from_cbor(data: &[u8]) -> Result<(Self, bool, usize), Self::Error> {
        bpcore_cbor::decode::parse::<(u64, bool, usize)>(data)
            .map(|(value, shortest, len)| (value.into(), shortest, len))
    }
}

/// Represents a complete BPv7 bundle.
///
/// This struct flattens the logical contents of the primary block onto itself,
/// and carries the contents unpacked from well-known extension blocks alongside
/// a map of every block present, keyed by block number, for anything this core
/// does not interpret further.
#[derive(Default, Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bundle {
    // From Primary Block
    /// The unique identifier for the bundle.
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub id: Id,
    /// The bundle-specific processing control flags.
    pub flags: Flags,
    /// The type of CRC used for the primary block's integrity check.
    pub crc_type: crc::CrcType,
    /// The EID of the bundle's final destination.
    pub destination: eid::Eid,
    /// The EID to which status reports should be sent.
    pub report_to: eid::Eid,
    /// The time duration after which the bundle should be considered expired.
    pub lifetime: core::time::Duration,

    // Unpacked from extension blocks
    /// The EID of the node that last forwarded the bundle.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub previous_node: Option<eid::Eid>,
    /// The age of the bundle, used if the source node has no clock.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub age: Option<core::time::Duration>,
    /// The hop limit and current hop count for the bundle.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub hop_count: Option<hop_info::HopInfo>,

    /// A map of all blocks in the bundle, keyed by their block number.
    /// Block number 0 always refers to the primary block's own extent.
    pub blocks: HashMap<u64, block::Block>,
}

impl Bundle {
    /// Returns the payload bytes of the bundle's payload block (block number 1).
    pub fn payload<'a>(&self, source_data: &'a [u8]) -> Result<&'a [u8], Error> {
        let block = self.blocks.get(&1).ok_or(Error::MissingPayload)?;
        source_data
            .get(block.payload_range())
            .ok_or(Error::Altered)
    }

    /// Emits a freshly-constructed bundle to its canonical CBOR encoding.
    ///
    /// Unlike [`Bundle::from_cbor`], this does not attempt to preserve the byte
    /// layout of an existing encoding; it is intended for bundles assembled
    /// locally, e.g. by the dataservice layer's `send` operation.
    pub fn emit(&mut self, payload: &[u8]) -> Result<Box<[u8]>, Error> {
        let mut primary = primary_block::PrimaryBlock {
            flags: self.flags,
            crc_type: self.crc_type,
            destination: self.destination,
            id: self.id.clone(),
            report_to: self.report_to,
            lifetime: self.lifetime.as_millis() as u64,
            extent: 0..0,
        };

        let mut payload_block = block::Block {
            block_type: block::Type::Payload,
            flags: block::Flags::default(),
            crc_type: self.crc_type,
            bib: None,
            bcb: None,
            extent: 0..0,
            data: 0..0,
        };

        let data = bpcore_cbor::encode::try_emit_array(None, |array| {
            primary.emit(array)?;
            payload_block.emit(1, payload, array)
        })?;

        self.blocks.insert(
            0,
            block::Block {
                block_type: block::Type::Primary,
                flags: block::Flags::default(),
                crc_type: self.crc_type,
                bib: None,
                bcb: None,
                extent: primary.extent,
                data: 0..0,
            },
        );
        self.blocks.insert(1, payload_block);

        Ok(data.into())
    }
}

impl bpcore_cbor::decode::FromCbor for Bundle {
    type Error = Error;

    fn from_cbor(data: &[u8]) -> Result<(Self, bool, usize), Self::Error> {
        bpcore_cbor::decode::parse_array(data, |array, mut shortest, tags| {
            shortest = shortest && tags.is_empty();

            let (primary, s): (primary_block::PrimaryBlock, bool) = array.parse()?;
            shortest = shortest && s;

            let mut bundle = Bundle {
                id: primary.id.clone(),
                flags: primary.flags,
                crc_type: primary.crc_type,
                destination: primary.destination,
                report_to: primary.report_to,
                lifetime: core::time::Duration::from_millis(primary.lifetime),
                previous_node: None,
                age: None,
                hop_count: None,
                blocks: HashMap::new(),
            };
            bundle.blocks.insert(
                0,
                block::Block {
                    block_type: block::Type::Primary,
                    flags: block::Flags::default(),
                    crc_type: primary.crc_type,
                    bib: None,
                    bcb: None,
                    extent: primary.extent,
                    data: 0..0,
                },
            );

            let mut saw_payload = false;
            let mut last_was_payload = false;
            loop {
                let Some((entry, s)) = array.try_parse::<(block::BlockWithNumber, bool)>()?
                else {
                    break;
                };
                shortest = shortest && s;
                last_was_payload = matches!(entry.block.block_type, block::Type::Payload);

                if bundle.blocks.contains_key(&entry.number) {
                    return Err(Error::DuplicateBlockNumber(entry.number));
                }

                match entry.block.block_type {
                    block::Type::Payload => {
                        saw_payload = true;
                    }
                    block::Type::PreviousNode => {
                        if bundle.previous_node.is_some() {
                            return Err(Error::DuplicateBlocks(block::Type::PreviousNode));
                        }
                        let value = entry.payload.as_deref().unwrap_or(&data[entry.block.payload_range()]);
                        bundle.previous_node =
                            Some(bpcore_cbor::decode::parse(value).map_err(|e: bpcore_cbor::decode::Error| {
                                Error::InvalidField {
                                    field: "previous node EID",
                                    source: e.into(),
                                }
                            })?);
                    }
                    block::Type::BundleAge => {
                        if bundle.age.is_some() {
                            return Err(Error::DuplicateBlocks(block::Type::BundleAge));
                        }
                        let value = entry.payload.as_deref().unwrap_or(&data[entry.block.payload_range()]);
                        let age_ms: u64 =
                            bpcore_cbor::decode::parse(value).map_err(|e: bpcore_cbor::decode::Error| {
                                Error::InvalidField {
                                    field: "bundle age",
                                    source: e.into(),
                                }
                            })?;
                        bundle.age = Some(core::time::Duration::from_millis(age_ms));
                    }
                    block::Type::HopCount => {
                        if bundle.hop_count.is_some() {
                            return Err(Error::DuplicateBlocks(block::Type::HopCount));
                        }
                        let value = entry.payload.as_deref().unwrap_or(&data[entry.block.payload_range()]);
                        bundle.hop_count =
                            Some(bpcore_cbor::decode::parse(value).map_err(|e: bpcore_cbor::decode::Error| {
                                Error::InvalidField {
                                    field: "hop count",
                                    source: e.into(),
                                }
                            })?);
                    }
                    _ => {}
                }

                bundle.blocks.insert(entry.number, entry.block);
            }

            if !saw_payload {
                return Err(Error::MissingPayload);
            }
            if !last_was_payload {
                return Err(Error::PayloadNotFinal);
            }

            Ok((bundle, shortest))
        })
        .map(|((v, s), len)| (v, s, len))
    }
}

impl core::fmt::Display for Bundle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} -> {}", self.id, self.destination)
    }
}
