/*!
Administrative records: currently only the Delivery Acknowledgement by
Custody Signal (DACS) the cache uses to report accepted custody transfers
back to a bundle's `report_to` node (RFC 9171 §4.2.3's
`is_admin_record` flag marks a bundle's payload as one of these).
*/
use super::*;

/// Administrative record type code for a DACS. RFC 9171 reserves the
/// record-type numbering space for future registration; this crate only
/// ever produces and consumes this one type.
pub const RECORD_TYPE_DACS: u64 = 4;

/// A Delivery Acknowledgement by Custody Signal: the set of bundles, named
/// by their cache hash key, for which the sender is reporting a custody
/// disposition.
///
/// This is a deliberately simplified rendering of the administrative
/// record payload (`[record_type, [hash_key, ...]]`), not a port of the
/// original implementation's run-length fill/sequence-list encoding over
/// per-source creation-timestamp ranges: that format's defining structs
/// were not available to ground against. The hash keys here are the same
/// ones `bpcore-bpa`'s cache already computes and indexes by, so a
/// receiving cache can resolve them with no new identity scheme.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dacs {
    pub acknowledged: Vec<u64>,
}

impl Dacs {
    /// Encodes this record's canonical CBOR payload (the bundle's payload
    /// block content, not a whole bundle).
    pub fn encode(&self) -> Vec<u8> {
        bpcore_cbor::encode::emit_array(Some(2), |a| {
            a.emit(&RECORD_TYPE_DACS);
            a.emit_array(Some(self.acknowledged.len()), |keys| {
                for key in &self.acknowledged {
                    keys.emit(key);
                }
            });
        })
    }

    /// Decodes a DACS from a bundle's payload bytes.
    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        bpcore_cbor::decode::parse_array(data, |array, _, _| {
            let record_type: u64 = array.parse()?;
            if record_type != RECORD_TYPE_DACS {
                return Err(Error::Unsupported(record_type));
            }
            let (acknowledged, _) = array.parse_array(|keys, _, _| {
                let mut acknowledged = Vec::new();
                while let Some(key) = keys.try_parse::<u64>()? {
                    acknowledged.push(key);
                }
                Ok::<_, Error>(acknowledged)
            })?;
            Ok(Dacs { acknowledged })
        })
        .map(|(v, _)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_cbor() {
        let dacs = Dacs {
            acknowledged: alloc::vec![1, 2, 3],
        };
        let encoded = dacs.encode();
        let decoded = Dacs::decode(&encoded).unwrap();
        assert_eq!(dacs, decoded);
    }

    #[test]
    fn rejects_unknown_record_type() {
        let bytes = bpcore_cbor::encode::emit_array(Some(2), |a| {
            a.emit(&99u64);
            a.emit_array(Some(0), |_| {});
        });
        assert!(matches!(Dacs::decode(&bytes), Err(Error::Unsupported(99))));
    }
}
