use super::*;
use hex_literal::hex;

#[test]
fn tests() {
    ipn_check(&hex!("82 02 82 01 01"), 1, 1);
    ipn_check(&hex!("82 02 82 1B 000EE86800000001 01"), 0x000EE86800000001, 1);

    null_check(&hex!("82 01 00"));

    // Negative tests
    assert!(matches!(
        expect_error(&[]),
        EidError::InvalidCBOR(bpcore_cbor::decode::Error::NeedMoreData(1))
    ));
    assert!(matches!(
        expect_error(&hex!("82 03 00")),
        EidError::UnsupportedScheme(3)
    ));
}

fn expect_error(data: &[u8]) -> EidError {
    bpcore_cbor::decode::parse::<Eid>(data).expect_err("Parsed successfully!")
}

fn null_check(data: &[u8]) {
    assert_eq!(
        bpcore_cbor::decode::parse::<Eid>(data).expect("Failed to parse"),
        Eid::Null
    );
}

fn ipn_check(data: &[u8], expected_node_number: u64, expected_service_number: u64) {
    match bpcore_cbor::decode::parse(data).expect("Failed to parse") {
        Eid::Ipn {
            node_number,
            service_number,
        } => {
            assert_eq!(expected_node_number, node_number);
            assert_eq!(expected_service_number, service_number);
        }
        _ => panic!("Not an ipn EID!"),
    };
}
