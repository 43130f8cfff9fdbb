use std::fmt;

use anyhow::{Result, bail};
use clap::ValueEnum;
use img_hash::{HashAlg, HasherConfig};
use log::debug;

/// 素材指纹，分类的唯一依据
///
/// 无法读取或解码的素材得到 `Unknown`，它不会被任何分组命中。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fingerprint {
    Known(u64),
    Unknown,
}

impl Fingerprint {
    /// 映射到 `[0, 1)` 区间，用于区间规则
    pub fn unit(&self) -> Option<f64> {
        match self {
            Self::Known(v) => Some((v >> 11) as f64 / (1u64 << 53) as f64),
            Self::Unknown => None,
        }
    }

    pub fn value(&self) -> Option<u64> {
        match self {
            Self::Known(v) => Some(*v),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(v) => write!(f, "{v:016x}"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// 指纹函数，必须是纯函数，会在阻塞线程池中调用
pub trait Fingerprinter: Send + Sync + 'static {
    fn hash_bytes(&self, data: &[u8]) -> Result<u64>;

    /// 计算素材指纹，`data` 为 `None` 表示素材无法读取，此时以及计算失败时返回 `Unknown`
    fn fingerprint(&self, data: Option<&[u8]>) -> Fingerprint {
        match data.map(|data| self.hash_bytes(data)) {
            Some(Ok(v)) => Fingerprint::Known(v),
            Some(Err(e)) => {
                debug!("计算指纹失败: {e}");
                Fingerprint::Unknown
            }
            None => Fingerprint::Unknown,
        }
    }
}

/// 内置的指纹算法
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FingerprintAlgo {
    /// 文件内容的 blake3 哈希，不需要解码图片
    #[default]
    Blake3,
    /// 8x8 梯度感知哈希
    Dhash,
    /// 8x8 blockhash 感知哈希
    Blockhash,
}

impl FingerprintAlgo {
    fn perceptual(&self, alg: HashAlg, data: &[u8]) -> Result<u64> {
        let img = img_hash::image::load_from_memory(data)?;
        let hasher = HasherConfig::new().hash_alg(alg).hash_size(8, 8).to_hasher();
        let hash = hasher.hash_image(&img);
        let bytes: [u8; 8] = match hash.as_bytes().try_into() {
            Ok(bytes) => bytes,
            Err(_) => bail!("感知哈希长度错误: {}", hash.as_bytes().len()),
        };
        Ok(u64::from_le_bytes(bytes))
    }
}

impl Fingerprinter for FingerprintAlgo {
    fn hash_bytes(&self, data: &[u8]) -> Result<u64> {
        match self {
            Self::Blake3 => {
                let hash = blake3::hash(data);
                let mut b = [0u8; 8];
                b.copy_from_slice(&hash.as_bytes()[..8]);
                Ok(u64::from_le_bytes(b))
            }
            Self::Dhash => self.perceptual(HashAlg::Gradient, data),
            Self::Blockhash => self.perceptual(HashAlg::Blockhash, data),
        }
    }
}
