//! Config bundle contents
//!
//! Network function configuration is built as structured values and
//! serialized with `serde_yaml`, so key order in the output is stable and the
//! fingerprint only moves when a value does.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use open5gs_common::Error;

use crate::component::{
    endpoint_service_name, ComponentKind, METRICS_PORT, SBI_PORT,
};
use crate::normalize::{NetworkParameters, NormalizedSpec};

/// Key of the UPF tun-device setup script
pub const UPF_ENTRYPOINT_KEY: &str = "k8s-entrypoint.sh";
/// Key of the console account seeding script
pub const WEBUI_ADD_ADMIN_KEY: &str = "add_admin.sh";
/// Keys of the datastore probe scripts
pub const MONGODB_SCRIPT_KEYS: [&str; 3] =
    ["ping-mongodb.sh", "readiness-probe.sh", "startup-probe.sh"];

const UPF_ENTRYPOINT: &str = include_str!("../../scripts/upf-entrypoint.sh");
const WEBUI_ADD_ADMIN: &str = include_str!("../../scripts/webui-add-admin.sh");
const MONGODB_PING: &str = include_str!("../../scripts/mongodb-ping.sh");
const MONGODB_READINESS: &str = include_str!("../../scripts/mongodb-readiness-probe.sh");
const MONGODB_STARTUP: &str = include_str!("../../scripts/mongodb-startup-probe.sh");

/// UE address pool handed out by SMF/UPF
const SESSION_SUBNET: &str = "10.45.0.0/16";
const SESSION_GATEWAY: &str = "10.45.0.1";
const DEFAULT_DNN: &str = "internet";

/// File name of a network function's YAML config
pub fn config_file_name(kind: ComponentKind) -> String {
    format!("{}.yaml", kind.name())
}

/// All files that go into a component's config bundle
pub fn config_files(
    kind: ComponentKind,
    parent: &str,
    spec: &NormalizedSpec,
) -> Result<BTreeMap<String, String>, Error> {
    let mut files = BTreeMap::new();
    match kind {
        ComponentKind::WebUi => {
            files.insert(WEBUI_ADD_ADMIN_KEY.to_string(), WEBUI_ADD_ADMIN.to_string());
        }
        ComponentKind::MongoDb => {
            for (key, body) in MONGODB_SCRIPT_KEYS
                .iter()
                .zip([MONGODB_PING, MONGODB_READINESS, MONGODB_STARTUP])
            {
                files.insert(key.to_string(), body.to_string());
            }
        }
        _ => {
            let metrics = spec.settings(kind).metrics && kind.descriptor().metrics_capable;
            let body = function_config(kind, parent, &spec.network, metrics);
            let document = json!({
                "logger": { "level": "info" },
                kind.name(): body,
            });
            let yaml = serde_yaml::to_string(&document)
                .map_err(|e| Error::serialization_for_kind("ConfigMap", e.to_string()))?;
            files.insert(config_file_name(kind), yaml);
            if kind == ComponentKind::Upf {
                files.insert(UPF_ENTRYPOINT_KEY.to_string(), UPF_ENTRYPOINT.to_string());
            }
        }
    }
    Ok(files)
}

fn function_config(
    kind: ComponentKind,
    parent: &str,
    network: &NetworkParameters,
    metrics: bool,
) -> Value {
    let scp_uri = sbi_uri(parent, ComponentKind::Scp);
    let nrf_uri = sbi_uri(parent, ComponentKind::Nrf);

    let mut body = match kind {
        ComponentKind::Amf => json!({
            "sbi": sbi_with_client("scp", &scp_uri),
            "ngap": { "server": [ { "dev": "eth0" } ] },
            "guami": [ {
                "amf_id": { "region": scalar(&network.region), "set": scalar(&network.set) },
                "plmn_id": plmn(network),
            } ],
            "tai": [ { "plmn_id": plmn(network), "tac": [ scalar(&network.tac) ] } ],
            "plmn_support": [ {
                "plmn_id": plmn(network),
                "s_nssai": network.slices.iter()
                    .map(|s| json!({ "sst": scalar(&s.sst), "sd": s.sd }))
                    .collect::<Vec<_>>(),
            } ],
            "security": {
                "integrity_order": ["NIA2", "NIA1", "NIA0"],
                "ciphering_order": ["NEA0", "NEA1", "NEA2"],
            },
            "network_name": { "full": "Gradiant" },
            "amf_name": format!("{parent}-amf"),
            "time": { "t3512": { "value": 540 } },
        }),
        ComponentKind::Nrf => json!({
            "serving": [ { "plmn_id": plmn(network) } ],
            "sbi": sbi_server(),
        }),
        ComponentKind::Nssf => {
            let mut sbi = sbi_with_client("scp", &scp_uri);
            sbi["client"]["nsi"] = network
                .slices
                .iter()
                .map(|s| json!({ "uri": nrf_uri, "s_nssai": { "sst": s.sst, "sd": s.sd } }))
                .collect();
            json!({ "sbi": sbi })
        }
        ComponentKind::Scp => json!({ "sbi": sbi_with_client("nrf", &nrf_uri) }),
        ComponentKind::Smf => json!({
            "sbi": sbi_with_client("scp", &scp_uri),
            "pfcp": {
                "server": [ { "dev": "eth0" } ],
                "client": { "upf": [ {
                    "address": endpoint_service_name(parent, ComponentKind::Upf, "pfcp"),
                } ] },
            },
            "gtpc": { "server": [ { "dev": "eth0" } ] },
            "gtpu": { "server": [ { "dev": "eth0" } ] },
            "session": [ { "dnn": DEFAULT_DNN, "gateway": SESSION_GATEWAY, "subnet": SESSION_SUBNET } ],
            "dns": ["8.8.8.8", "8.8.4.4", "2001:4860:4860::8888", "2001:4860:4860::8844"],
            "mtu": 1400,
            "ctf": { "enabled": "auto" },
        }),
        ComponentKind::Udm => json!({
            "hnet": (1..=6).map(|id| {
                let (scheme, curve) = if id % 2 == 1 { (1, "curve25519") } else { (2, "secp256r1") };
                json!({
                    "id": id,
                    "scheme": scheme,
                    "key": format!("/opt/open5gs/etc/open5gs/hnet/{curve}-{id}.key"),
                })
            }).collect::<Vec<_>>(),
            "sbi": sbi_with_client("scp", &scp_uri),
        }),
        ComponentKind::Upf => json!({
            "pfcp": { "server": [ { "dev": "eth0" } ] },
            "gtpu": { "server": [ { "dev": "eth0" } ] },
            "session": [ {
                "dev": "ogstun",
                "dnn": DEFAULT_DNN,
                "gateway": SESSION_GATEWAY,
                "subnet": SESSION_SUBNET,
            } ],
        }),
        // AUSF, BSF, PCF, UDR only need to find the SCP
        _ => json!({ "sbi": sbi_with_client("scp", &scp_uri) }),
    };

    if metrics {
        body["metrics"] = json!({ "server": [ { "dev": "eth0", "port": METRICS_PORT } ] });
    }
    body
}

fn sbi_uri(parent: &str, kind: ComponentKind) -> String {
    format!(
        "http://{}:{}",
        endpoint_service_name(parent, kind, "sbi"),
        SBI_PORT
    )
}

fn sbi_server() -> Value {
    json!({ "server": [ { "dev": "eth0", "port": SBI_PORT } ] })
}

fn sbi_with_client(peer: &str, uri: &str) -> Value {
    let mut sbi = sbi_server();
    sbi["client"] = json!({ peer: [ { "uri": uri } ] });
    sbi
}

fn plmn(network: &NetworkParameters) -> Value {
    json!({ "mcc": network.mcc, "mnc": network.mnc })
}

/// Numeric-looking identifiers are written as YAML integers, as Open5GS expects
fn scalar(value: &str) -> Value {
    value
        .parse::<u64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use open5gs_common::crd::{CoreConfiguration, NetworkFunction, Open5GSSpec, Slice};

    fn parse(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).expect("rendered config is valid YAML")
    }

    #[test]
    fn amf_config_carries_plmn_and_slices() {
        let spec = normalize(&Open5GSSpec {
            configuration: Some(CoreConfiguration {
                mcc: Some("001".to_string()),
                mnc: Some("01".to_string()),
                slices: Some(vec![Slice {
                    sst: "1".to_string(),
                    sd: "0x111111".to_string(),
                }]),
                ..Default::default()
            }),
            ..Default::default()
        });

        let files = config_files(ComponentKind::Amf, "core", &spec).expect("renders");
        let config = parse(&files["amf.yaml"]);
        let amf = &config["amf"];
        assert_eq!(amf["guami"][0]["plmn_id"]["mcc"], "001");
        assert_eq!(amf["tai"][0]["tac"][0], 1);
        assert_eq!(amf["plmn_support"][0]["s_nssai"][0]["sst"], 1);
        assert_eq!(amf["plmn_support"][0]["s_nssai"][0]["sd"], "0x111111");
        assert_eq!(
            amf["sbi"]["client"]["scp"][0]["uri"],
            "http://core-scp-sbi:7777"
        );
        assert_eq!(amf["metrics"]["server"][0]["port"], 9090);
        assert_eq!(amf["amf_name"], "core-amf");
    }

    #[test]
    fn metrics_section_follows_flag() {
        let spec = normalize(&Open5GSSpec {
            smf: Some(NetworkFunction {
                metrics: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        });
        let files = config_files(ComponentKind::Smf, "core", &spec).expect("renders");
        let config = parse(&files["smf.yaml"]);
        assert!(config["smf"].get("metrics").is_none());
        assert_eq!(
            config["smf"]["pfcp"]["client"]["upf"][0]["address"],
            "core-upf-pfcp"
        );
    }

    #[test]
    fn upf_bundle_includes_entrypoint_script() {
        let spec = normalize(&Open5GSSpec::default());
        let files = config_files(ComponentKind::Upf, "core", &spec).expect("renders");
        assert!(files.contains_key("upf.yaml"));
        assert!(files[UPF_ENTRYPOINT_KEY].contains("ip tuntap add name ogstun"));
    }

    #[test]
    fn datastore_and_console_bundles_hold_scripts() {
        let spec = normalize(&Open5GSSpec::default());
        let mongo = config_files(ComponentKind::MongoDb, "core", &spec).expect("renders");
        assert_eq!(mongo.len(), 3);
        for key in MONGODB_SCRIPT_KEYS {
            assert!(mongo[key].starts_with("#!/bin/bash"));
        }

        let webui = config_files(ComponentKind::WebUi, "core", &spec).expect("renders");
        assert!(webui[WEBUI_ADD_ADMIN_KEY].contains("mongosh $DB_URI"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let spec = normalize(&Open5GSSpec::default());
        for kind in ComponentKind::ALL {
            let a = config_files(kind, "core", &spec).expect("renders");
            let b = config_files(kind, "core", &spec).expect("renders");
            assert_eq!(a, b, "{kind}");
        }
    }

    #[test]
    fn udm_declares_six_home_network_keys() {
        let spec = normalize(&Open5GSSpec::default());
        let files = config_files(ComponentKind::Udm, "core", &spec).expect("renders");
        let config = parse(&files["udm.yaml"]);
        let hnet = config["udm"]["hnet"].as_array().expect("hnet list");
        assert_eq!(hnet.len(), 6);
        assert_eq!(hnet[1]["scheme"], 2);
        assert_eq!(
            hnet[1]["key"],
            "/opt/open5gs/etc/open5gs/hnet/secp256r1-2.key"
        );
    }
}
