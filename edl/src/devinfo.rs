// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

//! Folding the three identity sources into one record: what Sahara said
//! about the chip, what \<configure\> said about the storage, and what
//! build.prop said about the product.

use crate::buildprop::BuildProp;
use crate::types::{ChipIdentity, StorageConfig};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub chip: Option<ChipIdentity>,
    pub storage: Option<StorageConfig>,

    pub brand: Option<String>,
    pub model: Option<String>,
    pub display_name: Option<String>,
    pub codename: Option<String>,
    pub android_version: Option<String>,
    pub security_patch: Option<String>,
    pub build_id: Option<String>,
    pub fingerprint: Option<String>,
    pub incremental: Option<String>,
    pub ota_version_full: Option<String>,
}

/// HyperOS generations map onto Android releases one-to-one.
fn android_version_from_hyperos(version_name: &str) -> Option<&'static str> {
    for (prefix, android) in [("OS3.", "16.0"), ("OS2.", "15.0"), ("OS1.", "14.0")] {
        if version_name.starts_with(prefix) {
            return Some(android);
        }
    }
    None
}

/// The second `/`-separated field of a fingerprint names the device:
/// `Xiaomi/fuxi/fuxi:14/...` -> `fuxi`.
fn codename_from_fingerprint(fingerprint: &str) -> Option<String> {
    let field = fingerprint.split('/').nth(1)?;
    if field.is_empty() {
        return None;
    }
    Some(field.to_owned())
}

pub fn aggregate(
    chip: Option<&ChipIdentity>,
    storage: Option<&StorageConfig>,
    props: &BuildProp,
) -> DeviceInfo {
    let brand = props.brand().map(str::to_owned);
    let model = props.model().map(str::to_owned);

    let display_name = match props.marketname() {
        Some(m) => Some(m.to_owned()),
        None => match (&brand, &model) {
            (Some(b), Some(m)) => Some(format!("{b} {m}")),
            _ => None,
        },
    };

    // The human-facing OTA string: a display id with a region tag like
    // "(CN01)" beats the plain OTA version.
    let ota_version_full = match props.display_id() {
        Some(d) if d.contains('(') && d.contains(')') => Some(d.to_owned()),
        _ => props.ota_version().map(str::to_owned),
    };

    let android_version = props
        .android_version()
        .map(str::to_owned)
        .or_else(|| {
            props
                .hyperos_version()
                .and_then(android_version_from_hyperos)
                .map(str::to_owned)
        });

    let fingerprint = props.fingerprint().map(str::to_owned);
    let codename = props
        .codename()
        .map(str::to_owned)
        .or_else(|| fingerprint.as_deref().and_then(codename_from_fingerprint));

    DeviceInfo {
        chip: chip.cloned(),
        storage: storage.cloned(),
        brand,
        model,
        display_name,
        codename,
        android_version,
        security_patch: props.security_patch().map(str::to_owned),
        build_id: props.build_id().map(str::to_owned),
        fingerprint,
        incremental: props.incremental().map(str::to_owned),
        ota_version_full,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props_of(pairs: &[(&str, &str)]) -> BuildProp {
        let mut bp = BuildProp::default();
        for (k, v) in pairs {
            bp.props.insert((*k).to_owned(), (*v).to_owned());
        }
        bp
    }

    #[test]
    fn display_name_prefers_marketname() {
        let props = props_of(&[
            ("ro.product.brand", "Xiaomi"),
            ("ro.product.model", "23049PCD8G"),
            ("ro.product.marketname", "Redmi Note 13 Pro"),
        ]);
        let info = aggregate(None, None, &props);
        assert_eq!(info.display_name.as_deref(), Some("Redmi Note 13 Pro"));

        let props = props_of(&[
            ("ro.product.brand", "Xiaomi"),
            ("ro.product.model", "23049PCD8G"),
        ]);
        let info = aggregate(None, None, &props);
        assert_eq!(info.display_name.as_deref(), Some("Xiaomi 23049PCD8G"));
    }

    #[test]
    fn region_tagged_display_id_wins_the_ota_field() {
        let props = props_of(&[
            ("ro.build.display.id.show", "OS1.0.3.0.UMRCNXM(CN01)"),
            ("ro.build.version.ota", "OS1.0.3.0"),
        ]);
        let info = aggregate(None, None, &props);
        assert_eq!(
            info.ota_version_full.as_deref(),
            Some("OS1.0.3.0.UMRCNXM(CN01)")
        );

        let props = props_of(&[
            ("ro.build.display.id.show", "UKQ1.230804.001"),
            ("ro.build.version.ota", "OS1.0.3.0"),
        ]);
        let info = aggregate(None, None, &props);
        assert_eq!(info.ota_version_full.as_deref(), Some("OS1.0.3.0"));
    }

    #[test]
    fn hyperos_generation_implies_android_version() {
        let props = props_of(&[("ro.mi.os.version.name", "OS3.0.1")]);
        let info = aggregate(None, None, &props);
        assert_eq!(info.android_version.as_deref(), Some("16.0"));

        let props = props_of(&[("ro.miui.ui.version.name", "OS1.0.3")]);
        let info = aggregate(None, None, &props);
        assert_eq!(info.android_version.as_deref(), Some("14.0"));

        // An explicit release wins over the inference.
        let props = props_of(&[
            ("ro.build.version.release", "14"),
            ("ro.mi.os.version.name", "OS3.0.1"),
        ]);
        let info = aggregate(None, None, &props);
        assert_eq!(info.android_version.as_deref(), Some("14"));
    }

    #[test]
    fn codename_extracted_from_fingerprint_when_absent() {
        let props = props_of(&[(
            "ro.build.fingerprint",
            "Xiaomi/fuxi/fuxi:14/UKQ1.230804.001/V816.0.3.0:user/release-keys",
        )]);
        let info = aggregate(None, None, &props);
        assert_eq!(info.codename.as_deref(), Some("fuxi"));

        let props = props_of(&[
            ("ro.product.device", "marble"),
            (
                "ro.build.fingerprint",
                "Xiaomi/fuxi/fuxi:14/UKQ1.230804.001/V816.0.3.0:user/release-keys",
            ),
        ]);
        let info = aggregate(None, None, &props);
        assert_eq!(info.codename.as_deref(), Some("marble"));
    }

    #[test]
    fn chip_and_storage_ride_along() {
        let chip = ChipIdentity {
            serial: 0x1234,
            msm_id: 0x009600e1,
            sahara_version: 2,
            ..Default::default()
        };
        let info = aggregate(Some(&chip), None, &BuildProp::default());
        assert_eq!(info.chip.as_ref().map(|c| c.msm_id), Some(0x009600e1));
        assert!(info.storage.is_none());
        assert!(info.brand.is_none());
    }
}
