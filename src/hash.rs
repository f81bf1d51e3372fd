use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use hex::encode;
use sha2::{Digest, Sha256};

use crate::error::UpgradeError;

pub struct Hash;

impl Hash {
    pub fn compute_sha2_hash(path: &Path) -> Result<String, UpgradeError> {
        let f = File::open(path).map_err(|e| UpgradeError::resource("Open", path, e))?;

        let mut reader = BufReader::new(f);
        let mut hasher = Sha256::new();
        let mut buffer = [0; 8192]; // Read in 8KB chunks

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        let hash = hasher.finalize();

        Ok(encode(hash))
    }

    pub fn short_sha2(hash: &str) -> &str {
        &hash[..hash.len().min(12)]
    }
}
