//! Display Service Abstraction
//!
//! This module defines the two services the engine drives, the vendor GPU
//! configuration service (mosaic topology, per-display color and HDR, driver
//! settings) and the OS display configuration service (paths, modes,
//! per-source scaling, per-target advanced color), together with the plain
//! value types they exchange.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::error::Result;

// ============================================================================
// Shared value types
// ============================================================================

/// Boot-session-scoped adapter identity (a LUID packed into 64 bits).
///
/// Only valid until the next reboot or driver reload; the adapter device path
/// is the durable anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdapterId(pub u64);

impl AdapterId {
    pub fn from_luid(low_part: u32, high_part: i32) -> Self {
        AdapterId(((high_part as u32 as u64) << 32) | low_part as u64)
    }

    pub fn low_part(&self) -> u32 {
        self.0 as u32
    }

    pub fn high_part(&self) -> i32 {
        (self.0 >> 32) as u32 as i32
    }
}

impl fmt::Display for AdapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}-{:08X}", self.high_part() as u32, self.low_part())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rational {
    pub numerator: u32,
    pub denominator: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size2D {
    pub cx: u32,
    pub cy: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Identity,
    Rotate90,
    Rotate180,
    Rotate270,
}

// ============================================================================
// OS display configuration service
// ============================================================================

/// Which paths a query returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryScope {
    ActivePaths,
    AllPaths,
}

/// Flag set passed to `OsDisplayService::set_paths_and_modes`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetFlags {
    pub validate_only: bool,
    pub use_supplied_config: bool,
    pub save_to_database: bool,
    pub force_mode_enumeration: bool,
    pub allow_changes: bool,
}

impl SetFlags {
    /// Apply the supplied paths and modes and persist them
    pub const fn apply() -> Self {
        Self {
            validate_only: false,
            use_supplied_config: true,
            save_to_database: true,
            force_mode_enumeration: false,
            allow_changes: false,
        }
    }

    /// Check the supplied paths and modes without touching the displays
    pub const fn validate() -> Self {
        Self {
            validate_only: true,
            use_supplied_config: true,
            save_to_database: false,
            force_mode_enumeration: false,
            allow_changes: false,
        }
    }

    pub const fn with_force_mode_enumeration(mut self) -> Self {
        self.force_mode_enumeration = true;
        self
    }

    pub const fn with_allow_changes(mut self) -> Self {
        self.allow_changes = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OutputTechnology {
    #[default]
    Other,
    Hd15,
    Dvi,
    Hdmi,
    DisplayPortExternal,
    DisplayPortEmbedded,
    Internal,
    Miracast,
    Indirect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Scaling {
    #[default]
    Identity,
    Centered,
    Stretched,
    AspectRatioCenteredMax,
    Custom,
    Preferred,
}

/// Mode index value meaning "no mode attached"
pub const MODE_IDX_INVALID: u32 = 0xffff_ffff;

/// Path flag: the path is part of the active desktop
pub const PATH_ACTIVE: u32 = 0x1;

/// Target status flag: the target id is synthetic, reported for an extra
/// target of a cloned source
pub const TARGET_CLONE_PLACEHOLDER: u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathSourceInfo {
    pub adapter_id: AdapterId,
    pub id: u32,
    pub mode_info_idx: u32,
    pub status_flags: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathTargetInfo {
    pub adapter_id: AdapterId,
    pub id: u32,
    pub mode_info_idx: u32,
    pub output_technology: OutputTechnology,
    pub rotation: Rotation,
    pub scaling: Scaling,
    pub refresh_rate: Rational,
    pub scan_line_ordering: u32,
    pub target_available: bool,
    pub status_flags: u32,
}

impl PathTargetInfo {
    pub fn is_clone_placeholder(&self) -> bool {
        self.status_flags & TARGET_CLONE_PLACEHOLDER != 0
    }
}

/// Source adapter/id wired to a target adapter/id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathInfo {
    pub source: PathSourceInfo,
    pub target: PathTargetInfo,
    pub flags: u32,
}

impl PathInfo {
    pub fn is_active(&self) -> bool {
        self.flags & PATH_ACTIVE != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModeInfoType {
    Source,
    Target,
    DesktopImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SourceMode {
    pub width: u32,
    pub height: u32,
    pub pixel_format: u32,
    pub position: Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VideoSignalInfo {
    pub pixel_rate: u64,
    pub h_sync_freq: Rational,
    pub v_sync_freq: Rational,
    pub active_size: Size2D,
    pub total_size: Size2D,
    pub video_standard: u32,
    pub scan_line_ordering: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DesktopImageInfo {
    pub path_source_size: Point,
    pub desktop_image_region: Rect,
    pub desktop_image_clip: Rect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModeData {
    Source(SourceMode),
    Target(VideoSignalInfo),
    DesktopImage(DesktopImageInfo),
}

/// Resolution/format details keyed by adapter + id + info type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModeInfo {
    pub adapter_id: AdapterId,
    pub id: u32,
    pub mode: ModeData,
}

impl ModeInfo {
    pub fn info_type(&self) -> ModeInfoType {
        match self.mode {
            ModeData::Source(_) => ModeInfoType::Source,
            ModeData::Target(_) => ModeInfoType::Target,
            ModeData::DesktopImage(_) => ModeInfoType::DesktopImage,
        }
    }
}

/// Monitor details reported for one target
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TargetDeviceName {
    pub monitor_friendly_name: Option<String>,
    pub monitor_device_path: Option<String>,
    pub edid_manufacture_id: Option<u16>,
    pub edid_product_code: Option<u16>,
    pub connector_instance: u32,
    pub output_technology: OutputTechnology,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorEncoding {
    #[default]
    Rgb,
    Ycbcr444,
    Ycbcr422,
    Ycbcr420,
    Intensity,
}

/// Per-target advanced color (OS-level HDR) state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AdvancedColorInfo {
    pub supported: bool,
    pub enabled: bool,
    pub wide_color_enforced: bool,
    pub force_disabled: bool,
    pub color_encoding: ColorEncoding,
    pub bits_per_color_channel: u32,
}

/// Per-source DPI scaling, in steps relative to the recommended value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DpiScale {
    pub minimum: i32,
    pub current: i32,
    pub maximum: i32,
    pub recommended: i32,
}

/// Legacy per-device mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DeviceMode {
    pub bits_per_pel: u32,
    pub pels_width: u32,
    pub pels_height: u32,
    pub display_frequency: u32,
    pub position: Point,
    pub orientation: u32,
}

pub const DISPLAY_DEVICE_ATTACHED_TO_DESKTOP: u32 = 0x1;
pub const DISPLAY_DEVICE_PRIMARY_DEVICE: u32 = 0x4;

/// Raw display device from the legacy enumeration API
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DisplayDevice {
    pub device_name: String,
    pub device_string: String,
    pub state_flags: u32,
    pub current_mode: Option<DeviceMode>,
}

/// OS display configuration service
pub trait OsDisplayService: Send + Sync {
    /// Required path and mode array sizes for a query
    fn get_buffer_sizes(&self, scope: QueryScope) -> Result<(u32, u32)>;

    /// Paths and modes; fails with `InsufficientBuffer` if the capacities are stale
    fn query_paths_and_modes(
        &self,
        scope: QueryScope,
        path_capacity: u32,
        mode_capacity: u32,
    ) -> Result<(Vec<PathInfo>, Vec<ModeInfo>)>;

    fn set_paths_and_modes(&self, paths: &[PathInfo], modes: &[ModeInfo], flags: SetFlags) -> Result<()>;

    fn get_source_dpi_scale(&self, adapter_id: AdapterId, source_id: u32) -> Result<DpiScale>;

    /// Sets the relative DPI step for a source
    fn set_source_dpi_scale(&self, adapter_id: AdapterId, source_id: u32, scale: i32) -> Result<()>;

    fn get_advanced_color(&self, adapter_id: AdapterId, target_id: u32) -> Result<AdvancedColorInfo>;

    fn set_advanced_color(&self, adapter_id: AdapterId, target_id: u32, enable: bool) -> Result<()>;

    fn get_adapter_device_path(&self, adapter_id: AdapterId) -> Result<String>;

    /// GDI name of a source, e.g. `\\.\DISPLAY1`
    fn get_source_device_name(&self, adapter_id: AdapterId, source_id: u32) -> Result<String>;

    fn get_target_device_name(&self, adapter_id: AdapterId, target_id: u32) -> Result<TargetDeviceName>;

    fn enumerate_display_devices(&self) -> Result<Vec<DisplayDevice>>;

    fn backend_name(&self) -> &'static str;
}

// ============================================================================
// Vendor GPU configuration service
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectorType {
    Vga,
    Dvi,
    Hdmi,
    DisplayPort,
    UsbC,
    Internal,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GpuDisplay {
    pub display_id: u32,
    pub connector: ConnectorType,
    pub is_connected: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PhysicalGpu {
    pub handle: u32,
    pub name: String,
    pub bus_id: u32,
    pub displays: Vec<GpuDisplay>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TopologyBrief {
    pub topology: u32,
    pub enabled: bool,
    pub is_possible: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MosaicDisplaySettings {
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u32,
    pub frequency: u32,
    pub frequency_milli_hz: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GridDisplay {
    pub display_id: u32,
    pub overlap_x: i32,
    pub overlap_y: i32,
    pub rotation: Rotation,
    pub clone_group: u32,
}

/// One mosaic grid; a 1x1 grid per display means "not combined"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GridTopology {
    pub rows: u32,
    pub columns: u32,
    pub displays: Vec<GridDisplay>,
    pub display_settings: MosaicDisplaySettings,
    pub apply_with_bezel_correct: bool,
    pub immersive_gaming: bool,
    pub base_mosaic: bool,
    pub driver_reload_allowed: bool,
    pub accelerate_primary_display: bool,
}

impl GridTopology {
    pub fn is_single_display(&self) -> bool {
        self.rows == 1 && self.columns == 1 && self.displays.len() == 1
    }
}

/// Mosaic/surround state; `brief.enabled == false` is the individual-screens baseline
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MosaicTopology {
    pub brief: TopologyBrief,
    pub display_settings: MosaicDisplaySettings,
    pub overlap_x: i32,
    pub overlap_y: i32,
    pub grids: Vec<GridTopology>,
    pub viewports: Vec<Vec<Rect>>,
}

impl MosaicTopology {
    pub fn is_enabled(&self) -> bool {
        self.brief.enabled
    }
}

pub type TopologySnapshot = MosaicTopology;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorBpc {
    #[default]
    Default,
    Six,
    Eight,
    Ten,
    Twelve,
    Sixteen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorFormat {
    Rgb,
    Yuv422,
    Yuv444,
    Yuv420,
    #[default]
    Default,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Colorimetry {
    Rgb,
    Ycc601,
    Ycc709,
    Xvycc601,
    Xvycc709,
    Adobergb,
    Bt2020Rgb,
    Bt2020Ycc,
    #[default]
    Default,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DynamicRange {
    Vesa,
    Cea,
    #[default]
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorSelectionPolicy {
    User,
    Best,
    #[default]
    Default,
}

/// Per-display color block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ColorData {
    pub bpc: ColorBpc,
    pub format: ColorFormat,
    pub colorimetry: Colorimetry,
    pub dynamic_range: DynamicRange,
    pub selection_policy: ColorSelectionPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HdrMode {
    #[default]
    Off,
    Uhda,
    UhdaPassthrough,
    DolbyVision,
    Edr,
    Sdr,
    UhdaNb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct HdrCapabilities {
    pub hdr10_supported: bool,
    pub hdr10_plus_supported: bool,
    pub dolby_vision_supported: bool,
    pub driver_expanded_default_hdr_supported: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct HdrState {
    pub capabilities: HdrCapabilities,
    pub mode: HdrMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AdaptiveSync {
    pub disable_adaptive_sync: bool,
    pub disable_frame_splitting: bool,
    pub max_frame_interval: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DriverSetting {
    pub setting_id: u32,
    pub name: String,
    pub value: u32,
}

/// Driver settings of one profile; only the base profile is managed
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DriverProfile {
    pub name: String,
    pub is_base_profile: bool,
    pub settings: Vec<DriverSetting>,
}

pub type DriverSettingsSnapshot = DriverProfile;

/// Open driver-settings session; destroyed when dropped
pub trait DriverSettingsSession {
    fn base_profile(&mut self) -> Result<DriverProfile>;

    fn set_setting(&mut self, setting_id: u32, value: u32) -> Result<()>;

    fn restore_default(&mut self, setting_id: u32) -> Result<()>;

    /// Persists every change made through this session
    fn save(&mut self) -> Result<()>;
}

/// Vendor GPU configuration service
pub trait VendorService: Send + Sync {
    fn enumerate_gpus(&self) -> Result<Vec<PhysicalGpu>>;

    fn edid_manufacturer(&self, display_id: u32) -> Result<String>;

    fn edid_product_code(&self, display_id: u32) -> Result<u16>;

    fn edid_serial_number(&self, display_id: u32) -> Result<u32>;

    fn get_topology(&self) -> Result<MosaicTopology>;

    fn set_display_grids(&self, grids: &[GridTopology]) -> Result<()>;

    /// Turns the current mosaic topology off
    fn disable_topology(&self) -> Result<()>;

    fn get_color(&self, display_id: u32) -> Result<ColorData>;

    fn set_color(&self, display_id: u32, color: &ColorData) -> Result<()>;

    fn get_hdr(&self, display_id: u32) -> Result<HdrState>;

    fn set_hdr_mode(&self, display_id: u32, mode: HdrMode) -> Result<()>;

    fn get_adaptive_sync(&self, display_id: u32) -> Result<AdaptiveSync>;

    fn open_driver_settings(&self) -> Result<Box<dyn DriverSettingsSession + '_>>;

    fn backend_name(&self) -> &'static str;
}
