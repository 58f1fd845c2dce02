// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

use ember_render::RenderSize;

use crate::error::{EngineError, EngineResult};
use crate::shader::ShaderSet;

pub const DEFAULT_MAX_FRAMES_IN_FLIGHT: usize = 2;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentPreference {
    /// MAILBOX, then IMMEDIATE, then FIFO.
    #[default]
    LowLatency,
    /// FIFO only.
    Vsync,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderPaths {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

/// Where the two SPIR-V stages come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShaderSource {
    Files(ShaderPaths),
    /// Bytecode compiled into the binary, e.g. with `include_bytes!`.
    Embedded {
        vertex: &'static [u8],
        fragment: &'static [u8],
    },
}

impl ShaderSource {
    /// Reads and checks both stages; nothing on the GPU is touched.
    pub fn load(&self) -> EngineResult<ShaderSet> {
        match self {
            ShaderSource::Files(paths) => ShaderSet::load(&paths.vertex, &paths.fragment),
            ShaderSource::Embedded { vertex, fragment } => ShaderSet::new(vertex.to_vec(), fragment.to_vec()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub app_name: String,
    pub clear_color: [f32; 4],
    pub initial_size: RenderSize,
    pub max_frames_in_flight: usize,
    pub present: PresentPreference,
    /// Request `VK_LAYER_KHRONOS_validation` + debug messenger. Best-effort.
    pub validation: bool,
    pub shaders: ShaderSource,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_name: "Ember".to_owned(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            initial_size: RenderSize::new(800, 600),
            max_frames_in_flight: DEFAULT_MAX_FRAMES_IN_FLIGHT,
            present: PresentPreference::default(),
            validation: cfg!(debug_assertions),
            shaders: ShaderSource::Files(ShaderPaths {
                vertex: PathBuf::from("shaders/triangle.vert.spv"),
                fragment: PathBuf::from("shaders/triangle.frag.spv"),
            }),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.max_frames_in_flight == 0 {
            return Err(EngineError::InvalidConfig("max_frames_in_flight must be at least 1"));
        }
        if self.app_name.as_bytes().contains(&0) {
            return Err(EngineError::InvalidConfig("app_name contains a NUL byte"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_contract() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_frames_in_flight, 2);
        assert_eq!(cfg.initial_size, RenderSize::new(800, 600));
        assert_eq!(cfg.present, PresentPreference::LowLatency);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_frames_in_flight_rejected() {
        let cfg = EngineConfig {
            max_frames_in_flight: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn embedded_shaders_are_checked_on_load() {
        const WORD: &[u8] = &[0x03, 0x02, 0x23, 0x07];
        let ok = ShaderSource::Embedded {
            vertex: WORD,
            fragment: WORD,
        };
        let set = ok.load().unwrap();
        assert_eq!(set.vertex, WORD);

        let odd = ShaderSource::Embedded {
            vertex: WORD,
            fragment: &WORD[..3],
        };
        assert!(matches!(odd.load(), Err(EngineError::MisalignedBytecode { len: 3, .. })));
        let empty = ShaderSource::Embedded {
            vertex: &[],
            fragment: WORD,
        };
        assert!(matches!(empty.load(), Err(EngineError::EmptyBytecode)));
    }

    #[test]
    fn nul_in_app_name_rejected() {
        let cfg = EngineConfig {
            app_name: "bad\0name".into(),
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
