// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

//! Pulling build.prop contents off live partitions: walk super's
//! logical partitions (or their standalone ancestors), sniff the
//! filesystem, and fall back to scraping raw bytes when no filesystem
//! wants to be found.

use indexmap::IndexMap;
use regex::bytes::Regex;
use std::io::Cursor;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use crate::firehose::firehose_read_storage;
use crate::fs::{self, FsError, ReadAt};
use crate::gpt::Partition;
use crate::lpmeta::{LpPartition, parse_lp_metadata};
use crate::types::EdlChan;
use crate::FirehoseError;

/// Logical/standalone partitions worth asking, best sources first.
const PRIORITY_PARTITIONS: [&str; 6] = [
    "system",
    "system_ext",
    "product",
    "vendor",
    "odm",
    "my_manifest",
];

/// Extra physical partitions that only exist on legacy A-only layouts.
const LEGACY_EXTRA_PARTITIONS: [&str; 3] = ["persist", "cust", "lenovocust"];

const SLOT_SUFFIXES: [&str; 3] = ["", "_a", "_b"];

/// Offsets where a filesystem may hide behind a vendor signing blob.
const SIGNED_BLOB_OFFSETS: [u64; 6] = [
    4 * 1024,
    8 * 1024,
    64 * 1024,
    1024 * 1024,
    2 * 1024 * 1024,
    4 * 1024 * 1024,
];

/// Partitions smaller than this get raw-scraped when no filesystem is
/// recognized.
const SMALL_PARTITION_RAW_SCAN: u64 = 2 * 1024 * 1024;

const BRUTE_FORCE_LIMIT: u64 = 16 * 1024 * 1024;
const BRUTE_FORCE_WINDOW: usize = 512 * 1024;
const BRUTE_FORCE_ENOUGH: usize = 5;

const SUPER_PARSE_TIMEOUT: Duration = Duration::from_secs(30);
const PARTITION_TIMEOUT: Duration = Duration::from_secs(15);
const SYSTEM_PARTITION_TIMEOUT: Duration = Duration::from_secs(30);

/// Which family a property file came from; drives the merge policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropSource {
    System,
    Product,
    Vendor,
    Odm,
    Other,
}

impl PropSource {
    fn of_partition(name: &str) -> Self {
        let base = name
            .trim_end_matches("_a")
            .trim_end_matches("_b");
        match base {
            "system" | "system_ext" => Self::System,
            "product" => Self::Product,
            "vendor" => Self::Vendor,
            "odm" | "my_manifest" => Self::Odm,
            _ => Self::Other,
        }
    }

    fn is_vendorish(self) -> bool {
        matches!(self, Self::Vendor | Self::Odm)
    }
}

/// A flat property map plus accessors for the fields everything
/// downstream actually wants.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildProp {
    pub props: IndexMap<String, String>,
}

impl BuildProp {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.props.get(key).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    fn first_of(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.get(k))
    }

    pub fn brand(&self) -> Option<&str> {
        self.first_of(&[
            "ro.product.brand",
            "ro.product.vendor.brand",
            "ro.product.system.brand",
            "ro.product.odm.brand",
        ])
    }

    pub fn model(&self) -> Option<&str> {
        self.first_of(&[
            "ro.product.model",
            "ro.product.vendor.model",
            "ro.product.system.model",
            "ro.product.odm.model",
        ])
    }

    pub fn marketname(&self) -> Option<&str> {
        self.first_of(&[
            "ro.product.marketname",
            "ro.product.vendor.marketname",
            "ro.product.odm.marketname",
        ])
    }

    pub fn codename(&self) -> Option<&str> {
        self.first_of(&["ro.product.device", "ro.product.vendor.device", "ro.product.name"])
    }

    pub fn android_version(&self) -> Option<&str> {
        self.first_of(&[
            "ro.build.version.release",
            "ro.system.build.version.release",
            "ro.vendor.build.version.release",
        ])
    }

    pub fn security_patch(&self) -> Option<&str> {
        self.first_of(&[
            "ro.build.version.security_patch",
            "ro.vendor.build.security_patch",
        ])
    }

    pub fn build_id(&self) -> Option<&str> {
        self.first_of(&["ro.build.id", "ro.system.build.id"])
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.first_of(&[
            "ro.build.fingerprint",
            "ro.system.build.fingerprint",
            "ro.vendor.build.fingerprint",
        ])
    }

    pub fn incremental(&self) -> Option<&str> {
        self.first_of(&["ro.build.version.incremental"])
    }

    pub fn display_id(&self) -> Option<&str> {
        self.first_of(&["ro.build.display.id.show", "ro.build.display.id"])
    }

    pub fn ota_version(&self) -> Option<&str> {
        self.first_of(&[
            "ro.build.version.ota",
            "ro.build.ota.versionname",
            "ro.mi.os.version.incremental",
        ])
    }

    pub fn hyperos_version(&self) -> Option<&str> {
        self.first_of(&["ro.mi.os.version.name", "ro.miui.ui.version.name"])
    }
}

fn prop_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?-u)(ro|display|persist)\.[A-Za-z0-9._-]+=[^\s\x00]+")
            .expect("property pattern")
    })
}

/// Regex extraction for raw-partition content where line structure
/// cannot be trusted. First occurrence of a key wins.
fn regex_extract(data: &[u8]) -> BuildProp {
    let mut out = BuildProp::default();
    for m in prop_regex().find_iter(data) {
        let text = String::from_utf8_lossy(m.as_bytes());
        let Some((k, v)) = text.split_once('=') else {
            continue;
        };
        let v = v.trim_end_matches(|c: char| c.is_control());
        if !out.props.contains_key(k) {
            out.props.insert(k.to_owned(), v.to_owned());
        }
    }
    out
}

/// Parse property-file bytes. NUL bytes mean we are looking at raw
/// partition content, where only regex extraction makes sense.
pub fn parse_prop_bytes(data: &[u8]) -> BuildProp {
    if data.contains(&0) {
        return regex_extract(data);
    }

    let mut out = BuildProp::default();
    let text = String::from_utf8_lossy(data);
    for line in text.split(['\n', '\r']) {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        let v = v.trim_end_matches(|c: char| c.is_control());
        out.props.insert(k.trim().to_owned(), v.to_owned());
    }
    out
}

/// Fold per-partition results into one record.
///
/// Base rule: first source to define a key wins (callers feed results
/// in priority order). On top of that, vendor/odm take brand and model,
/// system takes the Android version, and the most informative OTA
/// string wins outright.
pub fn merge_harvest(results: &[(PropSource, BuildProp)]) -> BuildProp {
    let mut merged = BuildProp::default();
    for (_, bp) in results {
        for (k, v) in &bp.props {
            if !merged.props.contains_key(k) {
                merged.props.insert(k.clone(), v.clone());
            }
        }
    }

    for (source, bp) in results {
        if source.is_vendorish() {
            if let Some(brand) = bp.brand() {
                merged
                    .props
                    .insert("ro.product.brand".to_owned(), brand.to_owned());
            }
            if let Some(model) = bp.model() {
                merged
                    .props
                    .insert("ro.product.model".to_owned(), model.to_owned());
            }
            break;
        }
    }

    for (source, bp) in results {
        if *source == PropSource::System {
            if let Some(v) = bp.android_version() {
                merged
                    .props
                    .insert("ro.build.version.release".to_owned(), v.to_owned());
            }
            break;
        }
    }

    // "richer" = carries a region tag like "(CN01)", or simply says more.
    let richest = results
        .iter()
        .filter_map(|(_, bp)| bp.ota_version())
        .max_by_key(|v| (v.contains('('), v.len()));
    if let Some(ota) = richest {
        let ota = ota.to_owned();
        merged.props.insert("ro.build.version.ota".to_owned(), ota);
    }

    merged
}

/// Random access into one partition, sector-aligning every read and
/// keeping the last fetch around since walkers love tiny reads.
pub struct DeviceRangeReader<'a, T: EdlChan> {
    chan: &'a mut T,
    lun: u8,
    base_sector: u64,
    limit_bytes: u64,
    deadline: Option<Instant>,
    cache_offset: u64,
    cache: Vec<u8>,
}

/// Fetch granularity; walkers read a few bytes at a time, the wire
/// wants sectors.
const FETCH_CHUNK: usize = 16 * 1024;

impl<'a, T: EdlChan> DeviceRangeReader<'a, T> {
    pub fn new(chan: &'a mut T, lun: u8, base_sector: u64, limit_bytes: u64) -> Self {
        Self {
            chan,
            lun,
            base_sector,
            limit_bytes,
            deadline: None,
            cache_offset: 0,
            cache: Vec::new(),
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

impl<T: EdlChan> ReadAt for DeviceRangeReader<'_, T> {
    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, FsError> {
        if let Some(deadline) = self.deadline {
            if Instant::now() > deadline {
                return Err(FirehoseError::Timeout.into());
            }
        }
        if offset >= self.limit_bytes {
            return Ok(Vec::new());
        }
        let len = len.min((self.limit_bytes - offset) as usize);

        let cache_end = self.cache_offset + self.cache.len() as u64;
        if !(offset >= self.cache_offset && offset + len as u64 <= cache_end) {
            let sector_size = self.chan.fh_config().storage_sector_size as u64;
            let fetch = len.max(FETCH_CHUNK).min((self.limit_bytes - offset) as usize);

            let first = offset / sector_size;
            let last = (offset + fetch as u64).div_ceil(sector_size);
            let mut buf = Cursor::new(Vec::new());
            firehose_read_storage(
                self.chan,
                &mut buf,
                (last - first) as usize,
                self.lun,
                self.base_sector + first,
            )?;

            self.cache = buf.into_inner();
            self.cache_offset = first * sector_size;
        }

        let start = (offset - self.cache_offset) as usize;
        if start >= self.cache.len() {
            return Ok(Vec::new());
        }
        let end = (start + len).min(self.cache.len());
        Ok(self.cache[start..end].to_vec())
    }
}

struct OffsetReader<'a, R: ?Sized> {
    inner: &'a mut R,
    base: u64,
}

impl<R: ReadAt + ?Sized> ReadAt for OffsetReader<'_, R> {
    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, FsError> {
        self.inner.read_at(self.base + offset, len)
    }
}

fn looks_like_signed_blob(probe: &[u8]) -> bool {
    probe.len() >= 4
        && probe[0].is_ascii_uppercase()
        && probe[1].is_ascii_digit()
        && probe[2].is_ascii_digit()
        && probe[3] == b'_'
}

/// Probe one partition (already reachable through `reader`) for
/// properties: filesystem walk first, signed-blob offset ladder next,
/// raw scrape for small images last.
pub fn probe_partition<R: ReadAt + ?Sized>(
    reader: &mut R,
    size_bytes: u64,
) -> Result<Option<BuildProp>, FirehoseError> {
    let probe = match reader.read_at(0, 4096) {
        Ok(p) => p,
        Err(FsError::Transport(e)) => return Err(e),
        Err(FsError::Parse(_)) => return Ok(None),
    };

    if let Some(kind) = fs::sniff(&probe) {
        if let Some(data) = fs::find_build_prop(reader, kind)? {
            let props = parse_prop_bytes(&data);
            if !props.is_empty() {
                return Ok(Some(props));
            }
        }
        return Ok(None);
    }

    // Some vendors prepend a signing blob; the filesystem starts at one
    // of a few well-known offsets.
    if looks_like_signed_blob(&probe) {
        for off in SIGNED_BLOB_OFFSETS {
            if off >= size_bytes {
                break;
            }
            let mut shifted = OffsetReader {
                inner: reader,
                base: off,
            };
            let inner_probe = match shifted.read_at(0, 4096) {
                Ok(p) => p,
                Err(FsError::Transport(e)) => return Err(e),
                Err(FsError::Parse(_)) => continue,
            };
            if let Some(kind) = fs::sniff(&inner_probe) {
                if let Some(data) = fs::find_build_prop(&mut shifted, kind)? {
                    let props = parse_prop_bytes(&data);
                    if !props.is_empty() {
                        return Ok(Some(props));
                    }
                }
                return Ok(None);
            }
        }
    }

    if size_bytes < SMALL_PARTITION_RAW_SCAN {
        let raw = match reader.read_at(0, size_bytes as usize) {
            Ok(r) => r,
            Err(FsError::Transport(e)) => return Err(e),
            Err(FsError::Parse(_)) => return Ok(None),
        };
        let props = regex_extract(&raw);
        if !props.is_empty() {
            return Ok(Some(props));
        }
    }

    Ok(None)
}

/// Window-scan a partition for `ro.*=` patterns until enough distinct
/// properties accumulate.
pub fn brute_force_scan<R: ReadAt + ?Sized>(
    reader: &mut R,
    size_bytes: u64,
) -> Result<BuildProp, FirehoseError> {
    let mut out = BuildProp::default();
    let limit = size_bytes.min(BRUTE_FORCE_LIMIT);

    let mut offset = 0u64;
    while offset < limit && out.len() < BRUTE_FORCE_ENOUGH {
        let window = match reader.read_at(offset, BRUTE_FORCE_WINDOW) {
            Ok(w) => w,
            Err(FsError::Transport(e)) => return Err(e),
            Err(FsError::Parse(_)) => break,
        };
        if window.is_empty() {
            break;
        }
        for (k, v) in regex_extract(&window).props {
            out.props.entry(k).or_insert(v);
        }
        offset += window.len() as u64;
    }

    Ok(out)
}

fn partition_deadline(name: &str) -> Instant {
    let timeout = if name.contains("system") {
        SYSTEM_PARTITION_TIMEOUT
    } else {
        PARTITION_TIMEOUT
    };
    Instant::now() + timeout
}

/// Everything learned about the device's property files, plus where it
/// came from.
#[derive(Debug, Default)]
pub struct Harvest {
    pub props: BuildProp,
    pub sources: Vec<String>,
}

/// Walk the device for build.prop content, best sources first:
/// the super partition's logical partitions first, standalone physical
/// partitions on legacy layouts, raw scraping as the last resort.
pub fn harvest_build_props<T: EdlChan>(
    chan: &mut T,
    catalog: &[Partition],
) -> Result<Harvest, FirehoseError> {
    let mut results: Vec<(PropSource, BuildProp)> = Vec::new();
    let mut sources: Vec<String> = Vec::new();

    let super_part = catalog.iter().find(|p| p.name == "super").cloned();
    let lp_parts: Vec<LpPartition> = match &super_part {
        Some(sp) => {
            let sector_size = chan.fh_config().storage_sector_size as u32;
            let mut reader = DeviceRangeReader::new(chan, sp.lun, sp.start_sector, sp.size_bytes())
                .with_deadline(Instant::now() + SUPER_PARSE_TIMEOUT);
            match parse_lp_metadata(&mut reader, sp.start_sector, sector_size) {
                Ok(parts) => parts,
                Err(FsError::Parse(_)) | Err(FsError::Transport(FirehoseError::Timeout)) => {
                    Vec::new()
                }
                Err(FsError::Transport(e)) => return Err(e),
            }
        }
        None => Vec::new(),
    };

    if let (Some(sp), false) = (&super_part, lp_parts.is_empty()) {
        // Logical partitions inside super.
        for base in PRIORITY_PARTITIONS {
            for suffix in SLOT_SUFFIXES {
                let name = format!("{base}{suffix}");
                let Some(lp) = lp_parts.iter().find(|p| p.name == name && p.size_bytes > 0)
                else {
                    continue;
                };

                let deadline = partition_deadline(&name);
                let mut reader =
                    DeviceRangeReader::new(chan, sp.lun, lp.absolute_sector, lp.size_bytes)
                        .with_deadline(deadline);
                match probe_partition(&mut reader, lp.size_bytes) {
                    Ok(Some(props)) => {
                        results.push((PropSource::of_partition(base), props));
                        sources.push(name);
                        break;
                    }
                    Ok(None) | Err(FirehoseError::Timeout) => {}
                    Err(e) => return Err(e),
                }
            }
            if harvest_is_sufficient(&results) {
                break;
            }
        }
    } else {
        // Legacy layout: standalone physical partitions.
        let all_names: Vec<&str> = PRIORITY_PARTITIONS
            .iter()
            .chain(LEGACY_EXTRA_PARTITIONS.iter())
            .copied()
            .collect();
        for base in all_names {
            for suffix in SLOT_SUFFIXES {
                let name = format!("{base}{suffix}");
                let Some(part) = catalog.iter().find(|p| p.name == name) else {
                    continue;
                };

                let deadline = partition_deadline(&name);
                let size = part.size_bytes();
                let mut reader =
                    DeviceRangeReader::new(chan, part.lun, part.start_sector, size)
                        .with_deadline(deadline);
                match probe_partition(&mut reader, size) {
                    Ok(Some(props)) => {
                        results.push((PropSource::of_partition(base), props));
                        sources.push(name);
                        break;
                    }
                    Ok(None) | Err(FirehoseError::Timeout) => {}
                    Err(e) => return Err(e),
                }
            }
            if harvest_is_sufficient(&results) {
                break;
            }
        }
    }

    let mut merged = merge_harvest(&results);

    // Last resort: scrape whatever system-ish partition exists.
    if merged.len() < BRUTE_FORCE_ENOUGH {
        let fallback = catalog
            .iter()
            .find(|p| p.name.starts_with("system"))
            .or_else(|| catalog.iter().find(|p| p.name == "super"))
            .cloned();
        if let Some(part) = fallback {
            let size = part.size_bytes();
            let mut reader = DeviceRangeReader::new(chan, part.lun, part.start_sector, size);
            let scraped = brute_force_scan(&mut reader, size)?;
            if !scraped.is_empty() {
                sources.push(format!("{} (raw scan)", part.name));
                results.push((PropSource::Other, scraped));
                merged = merge_harvest(&results);
            }
        }
    }

    Ok(Harvest {
        props: merged,
        sources,
    })
}

/// Stop early once both a system-side and a vendor-side source have
/// answered; nothing later in the order can override them.
fn harvest_is_sufficient(results: &[(PropSource, BuildProp)]) -> bool {
    let has_system = results
        .iter()
        .any(|(s, bp)| *s == PropSource::System && bp.android_version().is_some());
    let has_vendor = results
        .iter()
        .any(|(s, bp)| s.is_vendorish() && bp.brand().is_some() && bp.model().is_some());
    has_system && has_vendor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_prop_text() {
        let text = b"# comment\nro.product.brand=Xiaomi\r\nro.product.model=23049PCD8G\n\nro.build.version.release=14\n";
        let props = parse_prop_bytes(text);
        assert_eq!(props.brand(), Some("Xiaomi"));
        assert_eq!(props.model(), Some("23049PCD8G"));
        assert_eq!(props.android_version(), Some("14"));
        assert_eq!(props.len(), 3);
    }

    #[test]
    fn nul_bytes_switch_to_regex_mode() {
        let mut raw = vec![0u8; 64];
        raw.extend_from_slice(b"junk ro.product.brand=acme\x00\x00more persist.sys.lang=en\x00");
        raw.extend_from_slice(b"display.id=QKQ1.2209\x00");
        let props = parse_prop_bytes(&raw);
        assert_eq!(props.get("ro.product.brand"), Some("acme"));
        assert_eq!(props.get("persist.sys.lang"), Some("en"));
        assert_eq!(props.get("display.id"), Some("QKQ1.2209"));
    }

    #[test]
    fn control_bytes_are_trimmed_from_values() {
        let text = b"ro.build.id=UKQ1.230804.001\x01\x02\nro.x=1";
        let props = parse_prop_bytes(&text[..]);
        assert_eq!(props.build_id(), Some("UKQ1.230804.001"));
    }

    #[test]
    fn merge_prefers_vendor_for_brand_and_system_for_release() {
        let mut system = BuildProp::default();
        system
            .props
            .insert("ro.product.brand".into(), "generic".into());
        system
            .props
            .insert("ro.build.version.release".into(), "14".into());

        let mut vendor = BuildProp::default();
        vendor
            .props
            .insert("ro.product.vendor.brand".into(), "Xiaomi".into());
        vendor
            .props
            .insert("ro.product.vendor.model".into(), "23049PCD8G".into());
        vendor
            .props
            .insert("ro.vendor.build.version.release".into(), "13".into());

        let merged = merge_harvest(&[
            (PropSource::System, system),
            (PropSource::Vendor, vendor),
        ]);
        assert_eq!(merged.get("ro.product.brand"), Some("Xiaomi"));
        assert_eq!(merged.get("ro.product.model"), Some("23049PCD8G"));
        assert_eq!(merged.get("ro.build.version.release"), Some("14"));
    }

    #[test]
    fn merge_keeps_richer_ota_version() {
        let mut a = BuildProp::default();
        a.props
            .insert("ro.build.version.ota".into(), "OS1.0.3.0".into());
        let mut b = BuildProp::default();
        b.props
            .insert("ro.build.version.ota".into(), "OS1.0.3.0.UMRCNXM(CN01)".into());

        let merged = merge_harvest(&[(PropSource::System, a), (PropSource::Vendor, b)]);
        assert_eq!(
            merged.get("ro.build.version.ota"),
            Some("OS1.0.3.0.UMRCNXM(CN01)")
        );
    }

    #[test]
    fn probe_walks_an_erofs_partition() {
        use crate::fs::erofs::testimg::ErofsBuilder;

        let mut b = ErofsBuilder::new();
        b.put_dir_inline(1, &[(".", 1, 2), ("..", 1, 2), ("system", 4, 2)]);
        b.put_dir_inline(4, &[(".", 4, 2), ("..", 1, 2), ("build.prop", 7, 1)]);
        b.put_file_inline(
            7,
            b"ro.product.brand=Xiaomi\nro.product.model=23049PCD8G\nro.build.version.release=14\n",
        );

        let img = b.img;
        let mut r: &[u8] = &img;
        let props = probe_partition(&mut r, img.len() as u64).unwrap().unwrap();
        assert_eq!(props.brand(), Some("Xiaomi"));
        assert_eq!(props.model(), Some("23049PCD8G"));
        assert_eq!(props.android_version(), Some("14"));
    }

    #[test]
    fn probe_follows_signed_blob_offset_ladder() {
        use crate::fs::ext4::testimg::Ext4Builder;

        let mut b = Ext4Builder::new(true);
        b.put_dir(2, 10, &[(".", 2), ("..", 2), ("build.prop", 12)]);
        b.put_file(12, 20, b"ro.product.brand=acme\nro.product.model=AC-1\n");

        // Shift the whole filesystem behind an 8 KiB vendor blob.
        let mut img = vec![0u8; 8192];
        img[..4].copy_from_slice(b"S27_");
        img.extend_from_slice(&b.img);

        let mut r: &[u8] = &img;
        let props = probe_partition(&mut r, img.len() as u64).unwrap().unwrap();
        assert_eq!(props.brand(), Some("acme"));
    }

    #[test]
    fn probe_scrapes_small_raw_partitions() {
        let mut img = vec![0u8; 4096];
        img.extend_from_slice(b"ro.boot.hwversion=MP1\x00ro.boot.region=CN\x00");
        img.resize(64 * 1024, 0);

        let mut r: &[u8] = &img;
        let props = probe_partition(&mut r, img.len() as u64).unwrap().unwrap();
        assert_eq!(props.get("ro.boot.hwversion"), Some("MP1"));
        assert_eq!(props.get("ro.boot.region"), Some("CN"));
    }

    #[test]
    fn brute_force_stops_after_enough_distinct_props() {
        let mut img = Vec::new();
        for i in 0..20 {
            img.extend_from_slice(format!("ro.test.key{i}=value{i}\x00garbage").as_bytes());
            img.resize((i + 1) * 128 * 1024, 0xff);
        }

        let mut r: &[u8] = &img;
        let props = brute_force_scan(&mut r, img.len() as u64).unwrap();
        assert!(props.len() >= BRUTE_FORCE_ENOUGH);
    }
}
