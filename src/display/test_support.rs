//! Shared fixtures for the display tests

use std::collections::BTreeMap;

use crate::config::{ApplySettings, Settings};
use crate::display::backend::{
    AdaptiveSync, AdapterId, AdvancedColorInfo, ColorBpc, ColorData, ColorFormat, ConnectorType, DpiScale,
    DriverProfile, DriverSetting, GpuDisplay, HdrCapabilities, HdrState, MODE_IDX_INVALID, ModeData, ModeInfo,
    OutputTechnology, PATH_ACTIVE, PathInfo, PathSourceInfo, PathTargetInfo, PhysicalGpu, Point, Rational, Scaling,
    Size2D, SourceMode, TargetDeviceName, VideoSignalInfo,
};
use crate::display::fixture::{
    FixtureEdid, FixtureGpuState, FixtureMachine, FixtureMonitor, FixtureSource, MachineState, disabled_topology,
};
use crate::display::snapshot::VendorSnapshot;

pub const DESK_ADAPTER: AdapterId = AdapterId(0x0000_0000_0000_d2a4);
pub const DESK_ADAPTER_PATH: &str =
    "\\\\?\\PCI#VEN_10DE&DEV_2684&SUBSYS_16F310DE&REV_A1#4&2a1b3c4d&0&0008#{5b45201d-f2f2-4f3b-85bb-30ff1f953599}";
pub const LEFT_TARGET: u32 = 4352;
pub const RIGHT_TARGET: u32 = 4353;
pub const LEFT_DISPLAY: u32 = 0x1000;
pub const RIGHT_DISPLAY: u32 = 0x1001;

/// Active path without mode references
pub fn path(source_adapter: u64, source_id: u32, target_adapter: u64, target_id: u32) -> PathInfo {
    PathInfo {
        source: PathSourceInfo {
            adapter_id: AdapterId(source_adapter),
            id: source_id,
            mode_info_idx: MODE_IDX_INVALID,
            status_flags: 0,
        },
        target: PathTargetInfo {
            adapter_id: AdapterId(target_adapter),
            id: target_id,
            mode_info_idx: MODE_IDX_INVALID,
            output_technology: OutputTechnology::DisplayPortExternal,
            rotation: Default::default(),
            scaling: Scaling::Identity,
            refresh_rate: Rational {
                numerator: 144,
                denominator: 1,
            },
            scan_line_ordering: 1,
            target_available: true,
            status_flags: 0,
        },
        flags: PATH_ACTIVE,
    }
}

pub fn vendor_snapshot_with_identifiers(identifiers: &[&str]) -> VendorSnapshot {
    VendorSnapshot {
        display_identifiers: identifiers.iter().map(|id| id.to_string()).collect(),
        ..VendorSnapshot::default()
    }
}

/// Settings without settle waits
pub fn fast_settings() -> Settings {
    Settings {
        apply: ApplySettings {
            topology_settle_ms: 0,
            paths_settle_ms: 0,
        },
        ..Settings::default()
    }
}

fn source_mode(source_id: u32, x: i32) -> ModeInfo {
    ModeInfo {
        adapter_id: DESK_ADAPTER,
        id: source_id,
        mode: ModeData::Source(SourceMode {
            width: 2560,
            height: 1440,
            pixel_format: 4,
            position: Point { x, y: 0 },
        }),
    }
}

fn target_mode(target_id: u32) -> ModeInfo {
    ModeInfo {
        adapter_id: DESK_ADAPTER,
        id: target_id,
        mode: ModeData::Target(VideoSignalInfo {
            pixel_rate: 586_590_000,
            h_sync_freq: Rational {
                numerator: 222_250,
                denominator: 1,
            },
            v_sync_freq: Rational {
                numerator: 144,
                denominator: 1,
            },
            active_size: Size2D { cx: 2560, cy: 1440 },
            total_size: Size2D { cx: 2640, cy: 1543 },
            video_standard: 255,
            scan_line_ordering: 1,
        }),
    }
}

fn monitor(target_id: u32, friendly_name: &str, product: u16) -> FixtureMonitor {
    FixtureMonitor {
        adapter_id: DESK_ADAPTER,
        target_id,
        name: TargetDeviceName {
            monitor_friendly_name: Some(friendly_name.to_string()),
            monitor_device_path: Some(format!(
                "\\\\?\\DISPLAY#DELA1{:02X}#5&1b2c3d4e&0&UID{}#{{e6f07b5f-ee97-4a90-b076-33f57bf4eaa7}}",
                product & 0xff,
                target_id
            )),
            edid_manufacture_id: Some(4268),
            edid_product_code: Some(product),
            connector_instance: 0,
            output_technology: OutputTechnology::DisplayPortExternal,
        },
        advanced_color: Some(AdvancedColorInfo {
            supported: true,
            enabled: false,
            wide_color_enforced: false,
            force_disabled: false,
            color_encoding: Default::default(),
            bits_per_color_channel: 8,
        }),
        connected: true,
    }
}

fn source(source_id: u32) -> FixtureSource {
    FixtureSource {
        adapter_id: DESK_ADAPTER,
        source_id,
        device_name: format!("\\\\.\\DISPLAY{}", source_id + 1),
        device_string: "NVIDIA GeForce RTX 4090".to_string(),
        dpi: Some(DpiScale {
            minimum: 0,
            current: 1,
            maximum: 4,
            recommended: 1,
        }),
    }
}

fn wired_path(source_id: u32, target_id: u32, mode_base: u32) -> PathInfo {
    let mut path = path(DESK_ADAPTER.0, source_id, DESK_ADAPTER.0, target_id);
    path.source.mode_info_idx = mode_base;
    path.target.mode_info_idx = mode_base + 1;
    path
}

fn desk_gpu() -> FixtureGpuState {
    let display = |display_id: u32, connector: ConnectorType| GpuDisplay {
        display_id,
        connector,
        is_connected: true,
        is_active: true,
    };
    let color = ColorData {
        bpc: ColorBpc::Eight,
        format: ColorFormat::Rgb,
        ..ColorData::default()
    };
    let hdr = HdrState {
        capabilities: HdrCapabilities {
            hdr10_supported: true,
            ..HdrCapabilities::default()
        },
        ..HdrState::default()
    };

    FixtureGpuState {
        gpus: vec![PhysicalGpu {
            handle: 1,
            name: "NVIDIA GeForce RTX 4090".to_string(),
            bus_id: 1,
            displays: vec![
                display(LEFT_DISPLAY, ConnectorType::DisplayPort),
                display(RIGHT_DISPLAY, ConnectorType::DisplayPort),
            ],
        }],
        edid: BTreeMap::from([
            (
                LEFT_DISPLAY,
                FixtureEdid {
                    manufacturer: Some("DEL".to_string()),
                    product_code: Some(0xa1f0),
                    serial: Some(0x3032_4c4a),
                },
            ),
            (
                RIGHT_DISPLAY,
                FixtureEdid {
                    manufacturer: Some("DEL".to_string()),
                    product_code: Some(0xa1f1),
                    serial: Some(0x3032_4c4b),
                },
            ),
        ]),
        topology: disabled_topology(),
        color: BTreeMap::from([(LEFT_DISPLAY, color), (RIGHT_DISPLAY, color)]),
        hdr: BTreeMap::from([(LEFT_DISPLAY, hdr), (RIGHT_DISPLAY, hdr)]),
        adaptive_sync: BTreeMap::from([
            (LEFT_DISPLAY, AdaptiveSync::default()),
            (RIGHT_DISPLAY, AdaptiveSync::default()),
        ]),
        driver_profile: DriverProfile {
            name: "Base Profile".to_string(),
            is_base_profile: true,
            settings: vec![DriverSetting {
                setting_id: 0x00a8_79cf,
                name: "Vertical Sync".to_string(),
                value: 0x0841_6747,
            }],
        },
    }
}

/// Two side-by-side monitors on one vendor GPU, mosaic disabled
pub fn desk_machine() -> FixtureMachine {
    FixtureMachine::new(MachineState {
        adapters: BTreeMap::from([(DESK_ADAPTER, DESK_ADAPTER_PATH.to_string())]),
        monitors: vec![
            monitor(LEFT_TARGET, "DELL U2723QE", 0xa1f0),
            monitor(RIGHT_TARGET, "DELL U2723QE", 0xa1f1),
        ],
        sources: vec![source(0), source(1)],
        paths: vec![wired_path(0, LEFT_TARGET, 0), wired_path(1, RIGHT_TARGET, 2)],
        modes: vec![
            source_mode(0, 0),
            target_mode(LEFT_TARGET),
            source_mode(1, 2560),
            target_mode(RIGHT_TARGET),
        ],
        vendor: Some(desk_gpu()),
        ..MachineState::default()
    })
}
