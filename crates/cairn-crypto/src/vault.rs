//! Block vault: seal and open a whole block graph with AES-256-GCM.
//!
//! Every block is sealed independently as `iv(12) || AES-GCM(cid(32) || bytes)`
//! with a fresh random IV. A plaintext [`VaultIndex`] block is appended last; it
//! lists every sealed block and names the sealed form of the original root.
//! The index is the block a container should use as its root.

use std::collections::HashMap;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use cairn_types::{Block, Cid};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CryptoError, CryptoResult};
use crate::key::KeyMaterial;

const IV_LEN: usize = 12;
const CID_LEN: usize = 32;

/// Root block of an encrypted graph.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultIndex {
    /// Sealed form of the original root block.
    pub root: Cid,
    /// Every sealed block in the batch, in input order.
    pub blocks: Vec<Cid>,
}

fn cipher(key: &KeyMaterial) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()))
}

fn seal(cipher: &Aes256Gcm, block: &Block) -> CryptoResult<Block> {
    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let mut plaintext = Vec::with_capacity(CID_LEN + block.len());
    plaintext.extend_from_slice(block.cid().as_bytes());
    plaintext.extend_from_slice(block.bytes());

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext.as_slice())
        .map_err(|_| CryptoError::EncryptionFailed(block.cid()))?;

    let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(Block::new(out))
}

fn open(cipher: &Aes256Gcm, sealed: &Block) -> CryptoResult<Block> {
    let bytes = sealed.bytes();
    if bytes.len() < IV_LEN {
        return Err(CryptoError::Malformed {
            cid: sealed.cid(),
            reason: "shorter than the IV".into(),
        });
    }
    let (iv, ciphertext) = bytes.split_at(IV_LEN);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed(sealed.cid()))?;
    if plaintext.len() < CID_LEN {
        return Err(CryptoError::Malformed {
            cid: sealed.cid(),
            reason: "plaintext shorter than a cid".into(),
        });
    }
    let cid = Cid::try_from(&plaintext[..CID_LEN])?;
    Ok(Block::from_parts(cid, plaintext[CID_LEN..].to_vec())?)
}

/// Seal `blocks` under `key`.
///
/// `root` must be one of the input blocks. The returned list holds one sealed
/// block per input followed by the [`VaultIndex`] block, which is always last.
pub fn encrypt_blocks(root: Cid, blocks: &[Block], key: &KeyMaterial) -> CryptoResult<Vec<Block>> {
    let cipher = cipher(key);
    let mut out = Vec::with_capacity(blocks.len() + 1);
    let mut sealed_root = None;

    for block in blocks {
        let sealed = seal(&cipher, block)?;
        if block.cid() == root {
            sealed_root = Some(sealed.cid());
        }
        out.push(sealed);
    }

    let sealed_root = sealed_root.ok_or(CryptoError::MissingRoot(root))?;
    let index = VaultIndex {
        root: sealed_root,
        blocks: out.iter().map(Block::cid).collect(),
    };
    out.push(Block::encode(&index)?);

    debug!(root = %root.short_hex(), blocks = blocks.len(), "sealed block batch");
    Ok(out)
}

/// Open a sealed graph whose [`VaultIndex`] block is `root`.
///
/// `get` resolves sealed blocks by id. The returned list holds every opened
/// block; the original root is always last.
pub fn decrypt_blocks<F>(root: Cid, get: F, key: &KeyMaterial) -> CryptoResult<Vec<Block>>
where
    F: Fn(&Cid) -> Option<Block>,
{
    let index: VaultIndex = get(&root)
        .ok_or(CryptoError::MissingBlock(root))?
        .decode()?;
    let cipher = cipher(key);

    let mut opened: HashMap<Cid, Block> = HashMap::with_capacity(index.blocks.len());
    let mut order = Vec::with_capacity(index.blocks.len());
    for cid in &index.blocks {
        let sealed = get(cid).ok_or(CryptoError::MissingBlock(*cid))?;
        let block = open(&cipher, &sealed)?;
        order.push(*cid);
        opened.insert(*cid, block);
    }

    let plain_root = opened
        .remove(&index.root)
        .ok_or(CryptoError::MissingBlock(index.root))?;
    let mut out: Vec<Block> = order
        .iter()
        .filter_map(|cid| opened.remove(cid))
        .collect();
    out.push(plain_root);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> Vec<Block> {
        vec![
            Block::new(&b"alpha"[..]),
            Block::new(&b"beta"[..]),
            Block::new(&b"gamma"[..]),
        ]
    }

    fn lookup(blocks: &[Block]) -> impl Fn(&Cid) -> Option<Block> + '_ {
        move |cid| blocks.iter().find(|b| b.cid() == *cid).cloned()
    }

    #[test]
    fn roundtrip_puts_root_last() {
        let key = KeyMaterial::generate();
        let plain = batch();
        let root = plain[0].cid();

        let sealed = encrypt_blocks(root, &plain, &key).unwrap();
        assert_eq!(sealed.len(), plain.len() + 1);
        let index_cid = sealed.last().unwrap().cid();

        let opened = decrypt_blocks(index_cid, lookup(&sealed), &key).unwrap();
        assert_eq!(opened.len(), plain.len());
        assert_eq!(opened.last().unwrap().cid(), root);
        for block in &plain {
            assert!(opened.contains(block));
        }
    }

    #[test]
    fn ciphertext_hides_plaintext() {
        let key = KeyMaterial::generate();
        let plain = batch();
        let sealed = encrypt_blocks(plain[1].cid(), &plain, &key).unwrap();
        for block in &sealed[..plain.len()] {
            assert!(!block.bytes().windows(5).any(|w| w == b"alpha"));
        }
    }

    #[test]
    fn fresh_iv_per_encryption() {
        let key = KeyMaterial::generate();
        let plain = batch();
        let a = encrypt_blocks(plain[0].cid(), &plain, &key).unwrap();
        let b = encrypt_blocks(plain[0].cid(), &plain, &key).unwrap();
        assert_ne!(a[0].cid(), b[0].cid());
    }

    #[test]
    fn missing_root_is_rejected() {
        let key = KeyMaterial::generate();
        let err = encrypt_blocks(Cid::from_bytes(b"nope"), &batch(), &key).unwrap_err();
        assert!(matches!(err, CryptoError::MissingRoot(_)));
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let plain = batch();
        let sealed = encrypt_blocks(plain[0].cid(), &plain, &KeyMaterial::generate()).unwrap();
        let index_cid = sealed.last().unwrap().cid();
        let err = decrypt_blocks(index_cid, lookup(&sealed), &KeyMaterial::generate()).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed(_)));
    }

    #[test]
    fn missing_sealed_block_is_reported() {
        let key = KeyMaterial::generate();
        let plain = batch();
        let mut sealed = encrypt_blocks(plain[0].cid(), &plain, &key).unwrap();
        let index = sealed.pop().unwrap();
        let dropped = sealed.remove(1).cid();
        sealed.push(index.clone());
        let err = decrypt_blocks(index.cid(), lookup(&sealed), &key).unwrap_err();
        assert!(matches!(err, CryptoError::MissingBlock(cid) if cid == dropped));
    }
}
