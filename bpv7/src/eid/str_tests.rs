use super::*;

#[test]
fn tests() {
    ipn_check("ipn:1.2", 1, 2);
    ipn_check("ipn:1.0", 1, 0);
    ipn_check("ipn:977000.3", 977000, 3);

    null_check("ipn:0.0");
    null_check("dtn:none");

    // Negative tests
    expect_error("");
    expect_error("spaniel:none");
    expect_error("dtn:somewhere");
    expect_error("ipn:");
    expect_error("ipn:1");
    expect_error("ipn:1.2.3");
}

fn expect_error(s: &str) -> EidError {
    s.parse::<Eid>()
        .expect_err(&format!("\"{s}\" Parsed successfully!"))
}

fn null_check(s: &str) {
    assert!(matches!(
        s.parse::<Eid>()
            .unwrap_or_else(|_| panic!("Failed to parse \"{s}\"")),
        Eid::Null
    ));
}

fn ipn_check(s: &str, expected_node_number: u64, expected_service_number: u64) {
    match s.parse().expect("Failed to parse") {
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
