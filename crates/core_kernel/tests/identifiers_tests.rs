//! Unit tests for typed identifiers

use core_kernel::{AccountId, InvoiceId, InvoiceItemId, SubscriptionId};
use std::collections::HashSet;
use std::str::FromStr;
use uuid::Uuid;

#[test]
fn test_new_ids_are_unique() {
    let ids: HashSet<InvoiceItemId> = (0..100).map(|_| InvoiceItemId::new()).collect();
    assert_eq!(ids.len(), 100);
}

#[test]
fn test_v7_ids_carry_version() {
    let id = InvoiceId::new_v7();
    assert_eq!(id.as_uuid().get_version_num(), 7);
}

#[test]
fn test_display_carries_prefix() {
    let uuid = Uuid::new_v4();
    let id = AccountId::from_uuid(uuid);
    assert_eq!(id.to_string(), format!("ACC-{}", uuid));
    assert_eq!(InvoiceItemId::prefix(), "II");
}

#[test]
fn test_parse_with_and_without_prefix() {
    let id = SubscriptionId::new();
    let uuid = *id.as_uuid();

    assert_eq!(SubscriptionId::from_str(&id.to_string()).unwrap(), id);
    assert_eq!(SubscriptionId::from_str(&uuid.to_string()).unwrap(), id);
}

#[test]
fn test_parse_rejects_garbage() {
    assert!(InvoiceId::from_str("INV-not-a-uuid").is_err());
}

#[test]
fn test_serializes_as_bare_uuid() {
    let uuid = Uuid::new_v4();
    let id = InvoiceItemId::from(uuid);
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{}\"", uuid));

    let back: InvoiceItemId = serde_json::from_str(&json).unwrap();
    assert_eq!(Uuid::from(back), uuid);
}
