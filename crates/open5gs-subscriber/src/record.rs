//! Subscriber documents in the Open5GS datastore schema

use bson::{doc, Bson, Document};

use open5gs_common::crd::Open5GSUserSpec;
use open5gs_common::Error;

/// Field the subscriber collection is keyed on
pub const KEY_FIELD: &str = "imsi";

// unit 3 is Gbps in the Open5GS bitrate encoding
fn ambr() -> Document {
    doc! {
        "downlink": { "value": 1, "unit": 3 },
        "uplink": { "value": 1, "unit": 3 },
    }
}

/// Filter selecting the record of one subscriber
pub fn key_filter(imsi: &str) -> Document {
    doc! { KEY_FIELD: imsi }
}

/// Build the full record for a subscriber.
///
/// The spec is expected to have passed [`Open5GSUserSpec::validate`]; an
/// unparseable `sst` is still reported rather than written as garbage.
pub fn subscriber_document(spec: &Open5GSUserSpec) -> Result<Document, Error> {
    let sst: i32 = spec.sst.parse().map_err(|_| {
        Error::validation_for_field("spec.sst", format!("sst '{}' is not an integer", spec.sst))
    })?;

    let mut slice = doc! {
        "sst": sst,
        "default_indicator": true,
        "session": [{
            "name": spec.apn.as_str(),
            "type": 3,
            "qos": {
                "index": 9,
                "arp": {
                    "priority_level": 8,
                    "pre_emption_capability": 1,
                    "pre_emption_vulnerability": 1,
                },
            },
            "ambr": ambr(),
            "pcc_rule": [],
        }],
    };
    let sd = spec.sd_hex();
    if !sd.is_empty() {
        slice.insert("sd", sd.to_lowercase());
    }

    Ok(doc! {
        KEY_FIELD: spec.imsi.as_str(),
        "msisdn": [],
        "mme_host": [],
        "mme_realm": [],
        "purge_flag": [],
        "security": {
            "k": spec.key.as_str(),
            "opc": spec.opc.as_str(),
            "amf": "8000",
            "op": Bson::Null,
        },
        "ambr": ambr(),
        "slice": [slice],
        "access_restriction_data": 32,
        "subscriber_status": 0,
        "network_access_mode": 0,
        "subscribed_rau_tau_timer": 12,
        "schema_version": 1,
        "__v": 0,
    })
}
