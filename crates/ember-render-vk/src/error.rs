// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

use ash::vk;
use ember_render::{Lifecycle, LifecycleError};

/// Fatal engine errors. Recoverable surface conditions (out-of-date,
/// suboptimal) never show up here; they are routed to the resize path.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("vulkan loader unavailable: {0}")]
    Loader(#[from] ash::LoadingError),

    #[error("{what}: {result}")]
    Vulkan {
        what: &'static str,
        result: vk::Result,
    },

    #[error("no suitable physical device ({0})")]
    NoSuitableDevice(String),

    #[error("host failed to create a presentation surface: {0:#}")]
    Surface(anyhow::Error),

    #[error("reading shader {path:?}: {source}")]
    ShaderIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("shader bytecode is empty")]
    EmptyBytecode,

    #[error("shader bytecode length {len} is not a multiple of {word} bytes")]
    MisalignedBytecode { len: usize, word: usize },

    #[error("surface has a zero extent; nothing can be presented")]
    ZeroExtent,

    #[error("no memory type with {required:?}")]
    NoMemoryType { required: vk::MemoryPropertyFlags },

    #[error("swapchain offers {available} images, need at least {required}")]
    TooFewImages { available: u32, required: u32 },

    #[error("invalid engine config: {0}")]
    InvalidConfig(&'static str),

    #[error("engine is {0}, not running")]
    NotRunning(Lifecycle),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Names the failed call, the way `anyhow::Context` does for `?` chains.
pub trait VkResultExt<T> {
    fn vk(self, what: &'static str) -> EngineResult<T>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn vk(self, what: &'static str) -> EngineResult<T> {
        self.map_err(|result| EngineError::Vulkan { what, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vk_adapter_names_the_call() {
        let r: Result<(), vk::Result> = Err(vk::Result::ERROR_DEVICE_LOST);
        let err = r.vk("queue_submit").unwrap_err();
        assert!(matches!(
            err,
            EngineError::Vulkan {
                what: "queue_submit",
                result: vk::Result::ERROR_DEVICE_LOST
            }
        ));
        assert!(err.to_string().starts_with("queue_submit: "));
    }

    #[test]
    fn not_running_mentions_state() {
        let err = EngineError::NotRunning(Lifecycle::Released);
        assert_eq!(err.to_string(), "engine is released, not running");
    }
}
