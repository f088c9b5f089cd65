//! Capabilities-Exchange request.
//!
//! The client advertises the credit-control application for both auth and
//! accounting, one supported vendor (0) and a fixed Origin-State-Id of 0.
//! Product-Name is the only AVP sent without the M bit.

use std::net::IpAddr;

use crate::codec::{
    avp_code, Avp, AvpFlags, Command, Message, Value, BASE_APP_ID, CREDIT_CONTROL_APP_ID,
};
use crate::config::SessionConfig;

use super::ids::IdGenerator;

/// Build the CER sent once per connection.
///
/// `local_ip` is the local address of the connection; when unknown an empty
/// Host-IP-Address is sent.
pub fn capability_request(config: &SessionConfig, local_ip: Option<IpAddr>, ids: &IdGenerator) -> Message {
    if local_ip.is_none() {
        tracing::warn!("local address unknown, sending empty Host-IP-Address");
    }

    Message::request(
        Command::CapabilitiesExchange,
        BASE_APP_ID,
        ids.next_hop_by_hop(),
        ids.next_end_to_end(),
    )
    .with_avp(origin_host(config))
    .with_avp(origin_realm(config))
    .with_avp(Avp::mandatory(avp_code::HOST_IP_ADDRESS, Value::Address(local_ip)))
    .with_avp(Avp::mandatory(avp_code::VENDOR_ID, Value::Unsigned32(config.vendor_id)))
    .with_avp(Avp::new(
        avp_code::PRODUCT_NAME,
        AvpFlags::new(),
        Value::Utf8String(config.product_name.clone()),
    ))
    .with_avp(Avp::mandatory(avp_code::ORIGIN_STATE_ID, Value::Unsigned32(0)))
    .with_avp(Avp::mandatory(avp_code::SUPPORTED_VENDOR_ID, Value::Unsigned32(0)))
    .with_avp(Avp::mandatory(
        avp_code::AUTH_APPLICATION_ID,
        Value::Unsigned32(CREDIT_CONTROL_APP_ID),
    ))
    .with_avp(Avp::mandatory(
        avp_code::ACCT_APPLICATION_ID,
        Value::Unsigned32(CREDIT_CONTROL_APP_ID),
    ))
    .with_avp(Avp::mandatory(
        avp_code::FIRMWARE_REVISION,
        Value::Unsigned32(config.firmware_revision),
    ))
}

/// Origin-Host AVP for `config`
pub(crate) fn origin_host(config: &SessionConfig) -> Avp {
    Avp::mandatory(avp_code::ORIGIN_HOST, Value::DiameterIdentity(config.origin_host.clone()))
}

/// Origin-Realm AVP for `config`
pub(crate) fn origin_realm(config: &SessionConfig) -> Avp {
    Avp::mandatory(avp_code::ORIGIN_REALM, Value::DiameterIdentity(config.origin_realm.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig::new("127.0.0.1:3868", "client.example.net", "example.net")
            .with_product(10415, "dcc-core", 7)
    }

    #[test]
    fn test_capability_request_layout() {
        let ids = IdGenerator::with_seeds(100, 200);
        let cer = capability_request(&config(), Some("10.0.0.1".parse().unwrap()), &ids);

        assert!(cer.is_request());
        assert_eq!(cer.command(), Some(Command::CapabilitiesExchange));
        assert_eq!(cer.header.application_id, BASE_APP_ID);
        assert_eq!(cer.hop_by_hop(), 100);
        assert_eq!(cer.header.end_to_end, 200);

        let codes: Vec<u32> = cer.avps.iter().map(|avp| avp.code).collect();
        assert_eq!(
            codes,
            vec![
                avp_code::ORIGIN_HOST,
                avp_code::ORIGIN_REALM,
                avp_code::HOST_IP_ADDRESS,
                avp_code::VENDOR_ID,
                avp_code::PRODUCT_NAME,
                avp_code::ORIGIN_STATE_ID,
                avp_code::SUPPORTED_VENDOR_ID,
                avp_code::AUTH_APPLICATION_ID,
                avp_code::ACCT_APPLICATION_ID,
                avp_code::FIRMWARE_REVISION,
            ]
        );

        let product = cer.find_avp(avp_code::PRODUCT_NAME).unwrap();
        assert!(!product.flags.has(AvpFlags::MANDATORY));
        assert_eq!(product.as_str().as_deref(), Some("dcc-core"));
        assert!(cer
            .find_avp(avp_code::VENDOR_ID)
            .unwrap()
            .flags
            .has(AvpFlags::MANDATORY));
        assert_eq!(cer.find_avp(avp_code::VENDOR_ID).unwrap().as_u32(), Some(10415));
        assert_eq!(
            cer.find_avp(avp_code::AUTH_APPLICATION_ID).unwrap().as_u32(),
            Some(CREDIT_CONTROL_APP_ID)
        );
        assert_eq!(
            cer.find_avp(avp_code::FIRMWARE_REVISION).unwrap().as_u32(),
            Some(7)
        );
    }

    #[test]
    fn test_capability_request_wire_address() {
        let ids = IdGenerator::with_seeds(1, 1);
        let cer = capability_request(&config(), Some("10.0.0.1".parse().unwrap()), &ids);
        let decoded = Message::decode(cer.to_bytes().unwrap()).unwrap();
        let address = decoded.find_avp(avp_code::HOST_IP_ADDRESS).unwrap();
        assert_eq!(address.as_address(), Some(Some("10.0.0.1".parse().unwrap())));
    }

    #[test]
    fn test_capability_request_without_local_ip() {
        let ids = IdGenerator::with_seeds(1, 1);
        let cer = capability_request(&config(), None, &ids);
        let decoded = Message::decode(cer.to_bytes().unwrap()).unwrap();
        let address = decoded.find_avp(avp_code::HOST_IP_ADDRESS).unwrap();
        assert_eq!(address.as_address(), Some(None));
    }
}
