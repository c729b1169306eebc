use anyhow::{bail, Context, Result};
use md5::Md5;
use sha2::{Digest, Sha256, Sha512};
use std::{fmt::Display, fs::File, io, path::Path};

#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Checksum {
    Md5(Vec<u8>),
    Sha256(Vec<u8>),
    Sha512(Vec<u8>),
}

pub enum ChecksumValidator {
    Md5((Vec<u8>, Md5)),
    Sha256((Vec<u8>, Sha256)),
    Sha512((Vec<u8>, Sha512)),
}

impl ChecksumValidator {
    pub fn update(&mut self, data: impl AsRef<[u8]>) {
        match self {
            ChecksumValidator::Md5((_, v)) => v.update(data),
            ChecksumValidator::Sha256((_, v)) => v.update(data),
            ChecksumValidator::Sha512((_, v)) => v.update(data),
        }
    }

    pub fn finish(self) -> bool {
        match self {
            ChecksumValidator::Md5((c, v)) => c == v.finalize().to_vec(),
            ChecksumValidator::Sha256((c, v)) => c == v.finalize().to_vec(),
            ChecksumValidator::Sha512((c, v)) => c == v.finalize().to_vec(),
        }
    }
}

impl Checksum {
    pub fn from_md5_str(s: &str) -> Result<Self> {
        if s.len() != 32 {
            bail!("Malformed MD5 string: bad length")
        }
        Ok(Checksum::Md5(hex::decode(s)?))
    }

    pub fn from_sha256_str(s: &str) -> Result<Self> {
        if s.len() != 64 {
            bail!("Malformed Sha256 string: bad length")
        }
        Ok(Checksum::Sha256(hex::decode(s)?))
    }

    pub fn from_sha512_str(s: &str) -> Result<Self> {
        if s.len() != 128 {
            bail!("Malformed Sha512 string: bad length")
        }
        Ok(Checksum::Sha512(hex::decode(s)?))
    }

    pub fn get_validator(&self) -> ChecksumValidator {
        match self {
            Checksum::Md5(c) => ChecksumValidator::Md5((c.clone(), Md5::new())),
            Checksum::Sha256(c) => ChecksumValidator::Sha256((c.clone(), Sha256::new())),
            Checksum::Sha512(c) => ChecksumValidator::Sha512((c.clone(), Sha512::new())),
        }
    }

    pub fn cmp_read(&self, mut r: impl io::Read) -> Result<bool> {
        let mut validator = self.get_validator();
        let mut buf = [0u8; 8192];
        loop {
            let len = r.read(&mut buf)?;
            if len == 0 {
                break;
            }
            validator.update(&buf[..len]);
        }
        Ok(validator.finish())
    }

    pub fn cmp_file(&self, path: &Path) -> Result<bool> {
        let file = File::open(path).context(format!(
            "Failed to open {} for checking checksum",
            path.display()
        ))?;

        self.cmp_read(file)
    }
}

impl Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Checksum::Md5(hex) => {
                f.write_str("md5::")?;
                f.write_str(&hex::encode(hex))
            }
            Checksum::Sha256(hex) => {
                f.write_str("sha256::")?;
                f.write_str(&hex::encode(hex))
            }
            Checksum::Sha512(hex) => {
                f.write_str("sha512::")?;
                f.write_str(&hex::encode(hex))
            }
        }
    }
}

/// Whether `path` already holds a file of the given size and checksum
pub fn file_is_same(path: &Path, size: u64, checksum: &Checksum) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() == size => {
            checksum.cmp_file(path).unwrap_or(false)
        }
        _ => false,
    }
}
