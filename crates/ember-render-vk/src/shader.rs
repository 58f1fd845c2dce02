// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::Path;

use ash::vk;

use crate::error::{EngineError, EngineResult, VkResultExt};

/// SPIR-V is a stream of 32-bit words.
pub const WORD_SIZE: usize = std::mem::size_of::<u32>();

/// Reads a compiled shader verbatim; no format inspection happens here.
pub fn read_file(path: impl AsRef<Path>) -> EngineResult<Vec<u8>> {
    let path = path.as_ref();
    fs::read(path).map_err(|source| EngineError::ShaderIo {
        path: path.to_path_buf(),
        source,
    })
}

/// Reinterprets bytecode as native-endian words. Misaligned or empty input
/// is rejected here, before anything reaches the device.
pub fn bytecode_words(bytes: &[u8]) -> EngineResult<Vec<u32>> {
    if bytes.is_empty() {
        return Err(EngineError::EmptyBytecode);
    }
    if bytes.len() % WORD_SIZE != 0 {
        return Err(EngineError::MisalignedBytecode {
            len: bytes.len(),
            word: WORD_SIZE,
        });
    }
    // Copies, so the source slice needs no particular alignment.
    Ok(bytemuck::allocation::pod_collect_to_vec::<u8, u32>(bytes))
}

/// Shader module destroyed on drop; only lives until the pipeline is built.
pub struct ShaderModule {
    device: ash::Device,
    handle: vk::ShaderModule,
}

impl ShaderModule {
    pub fn handle(&self) -> vk::ShaderModule {
        self.handle
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.handle, None) };
    }
}

pub fn create_shader_module(device: &ash::Device, bytes: &[u8]) -> EngineResult<ShaderModule> {
    let code = bytecode_words(bytes)?;
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: code.len() * WORD_SIZE,
        ..Default::default()
    };
    let handle = unsafe { device.create_shader_module(&ci, None) }.vk("create_shader_module")?;
    Ok(ShaderModule {
        device: device.clone(),
        handle,
    })
}

/// Vertex + fragment bytecode, read once and reused on every pipeline rebuild.
#[derive(Clone, Debug)]
pub struct ShaderSet {
    pub vertex: Vec<u8>,
    pub fragment: Vec<u8>,
}

impl ShaderSet {
    /// Reads both stages and checks alignment up front so a bad file fails
    /// startup before any GPU object exists.
    pub fn load(vertex: impl AsRef<Path>, fragment: impl AsRef<Path>) -> EngineResult<Self> {
        Self::new(read_file(vertex)?, read_file(fragment)?)
    }

    pub fn new(vertex: Vec<u8>, fragment: Vec<u8>) -> EngineResult<Self> {
        bytecode_words(&vertex)?;
        bytecode_words(&fragment)?;
        Ok(Self { vertex, fragment })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    fn spirv_stub() -> Vec<u8> {
        let mut v = SPIRV_MAGIC.to_ne_bytes().to_vec();
        v.extend_from_slice(&[0u8; 12]);
        v
    }

    fn temp_file(name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("ember-{}-{name}", std::process::id()));
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn aligned_bytecode_becomes_words() {
        let words = bytecode_words(&spirv_stub()).unwrap();
        assert_eq!(words.len(), 4);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn unaligned_lengths_rejected() {
        for len in [1usize, 2, 3, 5, 17, 1023] {
            let err = bytecode_words(&vec![0u8; len]).unwrap_err();
            assert!(
                matches!(err, EngineError::MisalignedBytecode { len: l, word: 4 } if l == len),
                "len {len}"
            );
        }
    }

    #[test]
    fn empty_bytecode_rejected() {
        assert!(matches!(bytecode_words(&[]), Err(EngineError::EmptyBytecode)));
    }

    #[test]
    fn read_file_is_verbatim() {
        let bytes = spirv_stub();
        let path = temp_file("verbatim.spv", &bytes);
        assert_eq!(read_file(&path).unwrap(), bytes);
        fs::remove_file(path).ok();
    }

    #[test]
    fn read_then_check_rejects_odd_file() {
        let path = temp_file("odd.spv", &[3, 2, 35, 7, 0, 0]);
        let bytes = read_file(&path).unwrap();
        assert!(matches!(
            bytecode_words(&bytes),
            Err(EngineError::MisalignedBytecode { len: 6, .. })
        ));
        fs::remove_file(path).ok();
    }

    #[test]
    fn shader_set_fails_fast_on_bad_stage() {
        let good = temp_file("good.vert.spv", &spirv_stub());
        let bad = temp_file("bad.frag.spv", &[1, 2, 3]);
        let err = ShaderSet::load(&good, &bad).unwrap_err();
        assert!(matches!(err, EngineError::MisalignedBytecode { len: 3, .. }));
        fs::remove_file(good).ok();
        fs::remove_file(bad).ok();
    }

    #[test]
    fn missing_file_reports_path() {
        let err = read_file("/definitely/not/here.spv").unwrap_err();
        match err {
            EngineError::ShaderIo { path, .. } => {
                assert_eq!(path, std::path::Path::new("/definitely/not/here.spv"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
