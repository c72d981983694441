use crate::config::config::AttentionMode;
use crate::repositories::gpu_repository::GpuDevice;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ComputeCapability {
    pub major: u8,
    pub minor: u8,
}

impl ComputeCapability {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ComputeCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl Serialize for ComputeCapability {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

// Checked in order, so longer or more specific names come before the
// substrings they contain (e.g. "RTX 6000 Ada" before "A6000").
const CAPABILITY_TABLE: &[(&str, ComputeCapability)] = &[
    ("RTX PRO 6000", ComputeCapability::new(12, 0)),
    ("B200", ComputeCapability::new(10, 0)),
    ("5090", ComputeCapability::new(12, 0)),
    ("5080", ComputeCapability::new(12, 0)),
    ("5070", ComputeCapability::new(12, 0)),
    ("5060", ComputeCapability::new(12, 0)),
    ("H100", ComputeCapability::new(9, 0)),
    ("H200", ComputeCapability::new(9, 0)),
    ("RTX 6000 Ada", ComputeCapability::new(8, 9)),
    ("4090", ComputeCapability::new(8, 9)),
    ("4080", ComputeCapability::new(8, 9)),
    ("4070", ComputeCapability::new(8, 9)),
    ("4060", ComputeCapability::new(8, 9)),
    ("L40", ComputeCapability::new(8, 9)),
    ("L4", ComputeCapability::new(8, 9)),
    ("A100", ComputeCapability::new(8, 0)),
    ("A30", ComputeCapability::new(8, 0)),
    ("3090", ComputeCapability::new(8, 6)),
    ("3080", ComputeCapability::new(8, 6)),
    ("3070", ComputeCapability::new(8, 6)),
    ("3060", ComputeCapability::new(8, 6)),
    ("3050", ComputeCapability::new(8, 6)),
    ("A6000", ComputeCapability::new(8, 6)),
    ("A5000", ComputeCapability::new(8, 6)),
    ("A4000", ComputeCapability::new(8, 6)),
    ("A40", ComputeCapability::new(8, 6)),
    ("A10", ComputeCapability::new(8, 6)),
    ("2080", ComputeCapability::new(7, 5)),
    ("2070", ComputeCapability::new(7, 5)),
    ("2060", ComputeCapability::new(7, 5)),
    ("1660", ComputeCapability::new(7, 5)),
    ("1650", ComputeCapability::new(7, 5)),
    ("TITAN RTX", ComputeCapability::new(7, 5)),
    ("Quadro RTX", ComputeCapability::new(7, 5)),
    ("T4", ComputeCapability::new(7, 5)),
    ("V100", ComputeCapability::new(7, 0)),
    ("TITAN V", ComputeCapability::new(7, 0)),
    ("P100", ComputeCapability::new(6, 0)),
    ("TITAN Xp", ComputeCapability::new(6, 1)),
    ("TITAN X (Pascal)", ComputeCapability::new(6, 1)),
    ("1080", ComputeCapability::new(6, 1)),
    ("1070", ComputeCapability::new(6, 1)),
    ("1060", ComputeCapability::new(6, 1)),
    ("1050", ComputeCapability::new(6, 1)),
    ("P40", ComputeCapability::new(6, 1)),
];

/// Maps a marketing name such as "NVIDIA GeForce RTX 4090" to its
/// compute capability.
pub fn compute_capability(gpu_name: &str) -> Option<ComputeCapability> {
    let name = gpu_name.to_uppercase();
    CAPABILITY_TABLE
        .iter()
        .find(|(pattern, _)| name.contains(&pattern.to_uppercase()))
        .map(|(_, cc)| *cc)
}

/// CUDA flavour of the torch wheel index matching the GPU generation.
pub fn torch_wheel(cc: Option<ComputeCapability>) -> &'static str {
    match cc {
        Some(cc) if cc >= ComputeCapability::new(12, 0) => "cu128",
        _ => "cu124",
    }
}

/// Resolves `auto` to a concrete backend; explicit choices pass through.
pub fn select_attention(
    mode: AttentionMode,
    cc: Option<ComputeCapability>,
    sage_available: bool,
) -> AttentionMode {
    if mode != AttentionMode::Auto {
        return mode;
    }
    match cc {
        Some(cc) if sage_available && cc >= ComputeCapability::new(8, 0) => AttentionMode::Sage2,
        Some(cc) if sage_available && cc >= ComputeCapability::new(7, 5) => AttentionMode::Sage,
        _ => AttentionMode::Sdpa,
    }
}

/// Picks a memory profile (1 = most resident, 5 = most offloaded).
pub fn select_profile(vram_mb: u64, ram_mb: u64) -> u8 {
    match (vram_mb, ram_mb) {
        (v, r) if v >= 24_000 && r >= 64_000 => 1,
        (v, _) if v >= 24_000 => 3,
        (v, r) if v >= 12_000 && r >= 64_000 => 2,
        (v, r) if v >= 8_000 && r >= 32_000 => 4,
        _ => 5,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HardwareReport {
    pub gpus: Vec<GpuSummary>,
    pub ram_mb: u64,
    pub compute_capability: Option<ComputeCapability>,
    pub torch_wheel: &'static str,
    pub profile: u8,
    pub attention: AttentionMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct GpuSummary {
    pub name: String,
    pub vram_mb: u64,
}

impl HardwareReport {
    /// The first listed GPU drives every decision; extra cards are only
    /// reported.
    pub fn build(
        gpus: &[GpuDevice],
        ram_mb: u64,
        attention_mode: AttentionMode,
        profile_override: Option<u8>,
        sage_available: bool,
    ) -> Self {
        let primary = gpus.first();
        let cc = primary.and_then(|gpu| compute_capability(&gpu.name));
        let vram_mb = primary.map(|gpu| gpu.vram_mb).unwrap_or(0);
        Self {
            gpus: gpus
                .iter()
                .map(|gpu| GpuSummary {
                    name: gpu.name.clone(),
                    vram_mb: gpu.vram_mb,
                })
                .collect(),
            ram_mb,
            compute_capability: cc,
            torch_wheel: torch_wheel(cc),
            profile: profile_override.unwrap_or_else(|| select_profile(vram_mb, ram_mb)),
            attention: select_attention(attention_mode, cc, sage_available),
        }
    }
}
