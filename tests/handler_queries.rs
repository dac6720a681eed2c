//! Handler-level integration tests.
//!
//! These tests go through `NovaRequestHandler::handle_request()` → `NameResolver`
//! → inventory cache / delegate with decoded wire requests. No network needed.

mod common;

use std::net::Ipv4Addr;

use common::*;
use hickory_proto::op::{MessageType, ResponseCode};
use hickory_proto::rr::RecordType;
use hickory_proto::xfer::Protocol;
use nova_dns::config::DnsConfig;

// =========================================================================
// Instance answers
// =========================================================================

#[tokio::test]
async fn bare_instance_name_returns_fixed_addresses() {
    let h = harness(sample_inventory());
    let msg = execute_query(&h.handler, "web1.novalocal.", RecordType::A, 1).await;

    assert_a_response(&msg, &[Ipv4Addr::new(10, 0, 0, 5)]);
    assert_eq!(msg.id(), 1);
    assert_eq!(msg.message_type(), MessageType::Response);
    assert!(msg.authoritative());
    assert_eq!(msg.queries().len(), 1);
    assert_eq!(msg.queries()[0].name().to_ascii(), "web1.novalocal.");

    let answer = &msg.answers()[0];
    assert_eq!(answer.name().to_ascii(), "web1.novalocal.");
    assert_eq!(answer.ttl(), 60);
    assert_eq!(h.delegate.calls(), 0);
}

#[tokio::test]
async fn fixed_prefix_equals_bare_name() {
    let h = harness(sample_inventory());
    let msg = execute_query(&h.handler, "fixed.web1.novalocal.", RecordType::A, 2).await;
    assert_a_response(&msg, &[Ipv4Addr::new(10, 0, 0, 5)]);
    assert_eq!(msg.answers()[0].name().to_ascii(), "fixed.web1.novalocal.");
}

#[tokio::test]
async fn floating_prefix_returns_floating_addresses() {
    let h = harness(sample_inventory());
    let msg = execute_query(&h.handler, "floating.web1.novalocal.", RecordType::A, 3).await;
    assert_a_response(&msg, &[Ipv4Addr::new(172, 24, 4, 10)]);
}

#[tokio::test]
async fn multiple_interfaces_keep_provider_order_and_skip_ipv6() {
    let h = harness(sample_inventory());
    let msg = execute_query(&h.handler, "db1.novalocal.", RecordType::A, 4).await;
    assert_a_response(
        &msg,
        &[Ipv4Addr::new(10, 0, 0, 7), Ipv4Addr::new(10, 2, 0, 7)],
    );
}

#[tokio::test]
async fn configured_ttl_and_suffix_are_used() {
    let config = DnsConfig {
        ttl: 300,
        domain_suffix: "cloud".to_string(),
        ..DnsConfig::default()
    };
    let h = harness_with(sample_inventory(), config);

    let msg = execute_query(&h.handler, "web1.cloud.", RecordType::A, 5).await;
    assert_a_response(&msg, &[Ipv4Addr::new(10, 0, 0, 5)]);
    assert_eq!(msg.answers()[0].ttl(), 300);

    let msg = execute_query(&h.handler, "web1.novalocal.", RecordType::A, 6).await;
    assert_eq!(extract_a_ips(&msg), vec![DELEGATE_ADDR]);
    assert_eq!(h.delegate.calls(), 1);
}

// =========================================================================
// Empty answers
// =========================================================================

#[tokio::test]
async fn unknown_instance_is_empty_noerror() {
    let h = harness(sample_inventory());
    let msg = execute_query(&h.handler, "nosuch.novalocal.", RecordType::A, 10).await;
    assert_response_code(&msg, ResponseCode::NoError);
    assert!(msg.answers().is_empty());
    assert_eq!(h.delegate.calls(), 0);
}

#[tokio::test]
async fn malformed_names_are_empty_noerror() {
    let h = harness(sample_inventory());
    for (id, name) in [
        "novalocal.",
        "x.y.web1.novalocal.",
        "public.web1.novalocal.",
        "FIXED.web1.novalocal.",
    ]
    .into_iter()
    .enumerate()
    {
        let msg = execute_query(&h.handler, name, RecordType::A, id as u16).await;
        assert_response_code(&msg, ResponseCode::NoError);
        assert!(msg.answers().is_empty(), "{name} should have no answers");
    }
    assert_eq!(h.delegate.calls(), 0);
    assert_eq!(h.provider.calls(), 0);
}

#[tokio::test]
async fn aaaa_and_mx_in_suffix_are_empty() {
    let h = harness(sample_inventory());
    for rtype in [RecordType::AAAA, RecordType::MX] {
        let msg = execute_query(&h.handler, "db1.novalocal.", rtype, 11).await;
        assert_response_code(&msg, ResponseCode::NoError);
        assert!(msg.answers().is_empty(), "{rtype} should have no answers");
    }
    assert_eq!(h.delegate.calls(), 0);
}

// =========================================================================
// Delegation
// =========================================================================

#[tokio::test]
async fn out_of_scope_names_are_delegated() {
    let h = harness(sample_inventory());
    let msg = execute_query(&h.handler, "www.example.com.", RecordType::A, 20).await;

    assert_a_response(&msg, &[DELEGATE_ADDR]);
    assert!(!msg.authoritative());
    assert_eq!(h.delegate.calls(), 1);
    assert_eq!(h.provider.calls(), 0);

    let forwarded = h.delegate.last_request().unwrap();
    assert_eq!(forwarded.id(), 20);
    assert_eq!(forwarded.queries()[0].name().to_ascii(), "www.example.com.");
    assert!(forwarded.recursion_desired());
}

#[tokio::test]
async fn suffix_lookalike_is_delegated() {
    let h = harness(sample_inventory());
    execute_query(&h.handler, "web1.novalocalx.", RecordType::A, 21).await;
    execute_query(&h.handler, "web1.NOVALOCAL.", RecordType::A, 22).await;
    assert_eq!(h.delegate.calls(), 2);
}

#[tokio::test]
async fn other_types_in_suffix_are_delegated() {
    let h = harness(sample_inventory());
    let msg = execute_query(&h.handler, "web1.novalocal.", RecordType::TXT, 23).await;
    assert_response_code(&msg, ResponseCode::NoError);
    assert_eq!(h.delegate.calls(), 1);
}

#[tokio::test]
async fn delegate_sees_client_transport() {
    let h = harness(sample_inventory());
    let request = build_request("www.example.com.", RecordType::A, 24, Protocol::Tcp);
    handle(&h.handler, &request).await;
    assert_eq!(h.delegate.last_protocol(), Some(Protocol::Tcp));
}

#[tokio::test]
async fn cold_inventory_failure_is_delegated() {
    let h = harness(sample_inventory());
    h.provider.set_failing(true);

    let msg = execute_query(&h.handler, "web1.novalocal.", RecordType::A, 30).await;
    assert_a_response(&msg, &[DELEGATE_ADDR]);
    assert_eq!(h.delegate.calls(), 1);

    h.provider.set_failing(false);
    let msg = execute_query(&h.handler, "web1.novalocal.", RecordType::A, 31).await;
    assert_a_response(&msg, &[Ipv4Addr::new(10, 0, 0, 5)]);
    assert_eq!(h.delegate.calls(), 1);
}

// =========================================================================
// Caching
// =========================================================================

#[tokio::test]
async fn fresh_inventory_is_reused() {
    let h = harness(sample_inventory());
    for id in 0..5 {
        execute_query(&h.handler, "web1.novalocal.", RecordType::A, id).await;
    }
    assert_eq!(h.provider.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_inventory_is_refetched() {
    let h = harness(sample_inventory());
    execute_query(&h.handler, "web1.novalocal.", RecordType::A, 40).await;

    h.provider.set_records(vec![instance(
        "web1",
        &[("private", &[("10.9.9.9", nova_dns::inventory::AddressRole::Fixed)])],
    )]);

    tokio::time::advance(std::time::Duration::from_secs(30)).await;
    let msg = execute_query(&h.handler, "web1.novalocal.", RecordType::A, 41).await;
    assert_a_response(&msg, &[Ipv4Addr::new(10, 0, 0, 5)]);

    tokio::time::advance(std::time::Duration::from_secs(31)).await;
    let msg = execute_query(&h.handler, "web1.novalocal.", RecordType::A, 42).await;
    assert_a_response(&msg, &[Ipv4Addr::new(10, 9, 9, 9)]);
    assert_eq!(h.provider.calls(), 2);
}

// =========================================================================
// EDNS
// =========================================================================

#[tokio::test]
async fn edns_request_gets_edns_response() {
    let h = harness(sample_inventory());
    let request = build_edns_request("web1.novalocal.", RecordType::A, 50, 1232);
    let msg = handle(&h.handler, &request).await;

    assert_a_response(&msg, &[Ipv4Addr::new(10, 0, 0, 5)]);
    let edns = msg.extensions().as_ref().expect("response should carry EDNS");
    assert_eq!(edns.max_payload(), 1232);
}

#[tokio::test]
async fn plain_request_gets_no_edns() {
    let h = harness(sample_inventory());
    let msg = execute_query(&h.handler, "web1.novalocal.", RecordType::A, 51).await;
    assert!(msg.extensions().is_none());
}
