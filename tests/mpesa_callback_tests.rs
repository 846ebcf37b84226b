//! Callback parsing scenarios against the Daraja adapter, using captured
//! sandbox payload shapes.

use paywatch::crypto::SecretBox;
use paywatch::providers::mpesa::{MpesaConfig, MpesaProvider};
use paywatch::providers::provider::{CallbackHeaders, PaymentProvider};
use paywatch::providers::types::EventKind;
use serde_json::json;

fn provider() -> MpesaProvider {
    MpesaProvider::new(
        MpesaConfig::default(),
        SecretBox::new(&[3u8; 32]).expect("key"),
    )
    .expect("provider init")
}

fn headers() -> CallbackHeaders {
    CallbackHeaders::new()
}

#[test]
fn stk_happy_path_extracts_all_canonical_fields() {
    let body = json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": "ws_CO_X1",
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        {"Name": "Amount", "Value": 100},
                        {"Name": "MpesaReceiptNumber", "Value": "RAA1234"},
                        {"Name": "TransactionDate", "Value": 20260801121500u64},
                        {"Name": "PhoneNumber", "Value": 254712345678u64},
                        {"Name": "AccountReference", "Value": "INV-7"}
                    ]
                }
            }
        }
    });

    let event = provider()
        .parse_callback(body.to_string().as_bytes(), &headers())
        .expect("parse");

    assert_eq!(event.kind, EventKind::Stk);
    assert_eq!(event.external_id, "ws_CO_X1");
    assert_eq!(event.amount, 100);
    assert_eq!(event.msisdn, "254712345678");
    assert_eq!(event.invoice_ref, "INV-7");
    assert_eq!(event.transaction_id, "RAA1234");
    assert_eq!(event.status, "completed");
}

#[test]
fn stk_cancellation_maps_to_failed() {
    let body = json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-2",
                "CheckoutRequestID": "ws_CO_X1",
                "ResultCode": 1032,
                "ResultDesc": "Request cancelled by user"
            }
        }
    });

    let event = provider()
        .parse_callback(body.to_string().as_bytes(), &headers())
        .expect("parse");

    assert_eq!(event.status, "failed");
    assert_eq!(event.response_description, "Request cancelled by user");
    assert_eq!(event.amount, 0);
}

#[test]
fn c2b_confirmation_fields_survive_string_amounts() {
    let body = json!({
        "TransactionType": "Pay Bill",
        "TransID": "ABC1",
        "TransTime": "20260801121500",
        "TransAmount": "50.00",
        "BusinessShortCode": "174379",
        "BillRefNumber": "INV-9",
        "MSISDN": "254712345678",
        "FirstName": "JOHN"
    });

    let event = provider()
        .parse_callback(body.to_string().as_bytes(), &headers())
        .expect("parse");

    assert_eq!(event.kind, EventKind::C2b);
    assert_eq!(event.external_id, "ABC1");
    assert_eq!(event.amount, 50);
    assert_eq!(event.msisdn, "254712345678");
    assert_eq!(event.invoice_ref, "INV-9");
    assert_eq!(event.status, "completed");
}

#[test]
fn b2c_result_extracts_receipt_amount_and_receiver() {
    let body = json!({
        "Result": {
            "ResultType": 0,
            "ResultCode": 0,
            "ResultDesc": "The service request is processed successfully.",
            "OriginatorConversationID": "10571-7910404-1",
            "ConversationID": "AG_20260801_000001",
            "TransactionID": "RAA5678",
            "ResultParameters": {
                "ResultParameter": [
                    {"Key": "TransactionAmount", "Value": 1500},
                    {"Key": "TransactionReceipt", "Value": "RAA5678"},
                    {"Key": "B2CUtilityAccountAvailableFunds", "Value": 10116.0},
                    {"Key": "ReceiverPartyPublicName", "Value": "254722000000 - JANE DOE"}
                ]
            }
        }
    });

    let event = provider()
        .parse_callback(body.to_string().as_bytes(), &headers())
        .expect("parse");

    assert_eq!(event.kind, EventKind::B2c);
    assert_eq!(event.external_id, "AG_20260801_000001");
    assert_eq!(event.amount, 1500);
    assert_eq!(event.transaction_id, "RAA5678");
    assert_eq!(event.msisdn, "254722000000");
    assert_eq!(event.status, "completed");
}

/// Parsing a fresh provider sample and re-parsing the captured raw payload
/// must produce the same canonical fields; the worker depends on this when it
/// re-derives fields from `raw_payload`.
#[test]
fn reparsing_the_captured_raw_payload_is_stable() {
    let provider = provider();
    let samples = [
        json!({
            "Body": {"stkCallback": {
                "CheckoutRequestID": "ws_CO_Y1",
                "ResultCode": 0,
                "ResultDesc": "ok",
                "CallbackMetadata": {"Item": [
                    {"Name": "Amount", "Value": "75.00"},
                    {"Name": "PhoneNumber", "Value": 254700111222u64}
                ]}
            }}
        }),
        json!({
            "TransID": "XYZ9",
            "TransAmount": 120,
            "BillRefNumber": "INV-4",
            "MSISDN": "254700111222"
        }),
        json!({
            "Result": {
                "ConversationID": "AG_20260801_000009",
                "ResultCode": 1,
                "ResultDesc": "insufficient funds"
            }
        }),
    ];

    for sample in samples {
        let first = provider
            .parse_callback(sample.to_string().as_bytes(), &headers())
            .expect("first parse");
        let second = provider
            .parse_callback(first.raw.to_string().as_bytes(), &headers())
            .expect("reparse of captured payload");

        assert_eq!(first.kind, second.kind);
        assert_eq!(first.external_id, second.external_id);
        assert_eq!(first.amount, second.amount);
        assert_eq!(first.msisdn, second.msisdn);
        assert_eq!(first.invoice_ref, second.invoice_ref);
        assert_eq!(first.status, second.status);
    }
}

#[test]
fn duplicate_deliveries_parse_identically() {
    let provider = provider();
    let body = json!({
        "TransID": "ABC1",
        "TransAmount": "50.00",
        "BillRefNumber": "INV-9",
        "MSISDN": "254712345678"
    })
    .to_string();

    let first = provider
        .parse_callback(body.as_bytes(), &headers())
        .expect("first delivery");
    let second = provider
        .parse_callback(body.as_bytes(), &headers())
        .expect("second delivery");

    // Same compound key → the event store collapses these to one row.
    assert_eq!(first.kind, second.kind);
    assert_eq!(first.external_id, second.external_id);
    assert_eq!(first, second);
}
