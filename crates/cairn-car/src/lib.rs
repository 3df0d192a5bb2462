//! Container ("CAR") file format for cairn.
//!
//! A container bundles a batch of content-addressed blocks behind one or more
//! root ids. The first root is the typed commit header ([`CarHeader`]), or the
//! vault index when the batch is encrypted. Containers are immutable and
//! identified by the digest of their bytes.
//!
//! # Format
//!
//! ```text
//! varint(n) || bincode(roots: Vec<Cid>)           prelude
//! varint(32 + len) || cid(32) || bytes(len)        one section per block
//! ```
//!
//! There is no version tag in the bytes; versioning lives in the store's
//! namespacing.

pub mod error;
pub mod header;
pub mod reader;
mod varint;
pub mod writer;

pub use error::{CarError, CarResult};
pub use header::{CarHeader, CommitMeta};
pub use reader::CarReader;
pub use writer::{encode_car_file, CarFile, CarWriter};

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_types::{Block, Cid};
    use proptest::prelude::*;

    fn header_block(head: Vec<Cid>) -> Block {
        CarHeader::new(CommitMeta::data(head), vec![], vec![])
            .to_block()
            .unwrap()
    }

    // ---- writer / reader ----

    #[test]
    fn write_read_container() {
        let a = Block::new(&b"a"[..]);
        let b = Block::new(&b"b"[..]);
        let header = header_block(vec![a.cid()]);

        let car = encode_car_file(vec![header.cid()], [a.clone(), b.clone(), header.clone()]).unwrap();
        assert_eq!(car.cid, Cid::from_bytes(&car.bytes));

        let reader = CarReader::from_bytes(car.bytes).unwrap();
        assert_eq!(reader.root(), header.cid());
        assert_eq!(reader.len(), 3);
        assert_eq!(reader.get(&a.cid()), Some(&a));
        assert_eq!(reader.get(&b.cid()), Some(&b));
        assert!(!reader.contains(&Cid::from_bytes(b"nope")));
    }

    #[test]
    fn duplicate_blocks_are_stored_once() {
        let a = Block::new(&b"a"[..]);
        let mut writer = CarWriter::new(vec![a.cid()]);
        writer.add_block(a.clone());
        writer.add_block(a);
        assert_eq!(writer.len(), 1);
    }

    #[test]
    fn finish_requires_root_block() {
        let a = Block::new(&b"a"[..]);
        let root = Cid::from_bytes(b"missing");
        let err = encode_car_file(vec![root], [a]).unwrap_err();
        assert!(matches!(err, CarError::MissingRoot(cid) if cid == root));
    }

    #[test]
    fn finish_requires_a_root() {
        let err = encode_car_file(vec![], [Block::new(&b"a"[..])]).unwrap_err();
        assert!(matches!(err, CarError::NoRoots));
    }

    #[test]
    fn same_content_same_container_id() {
        let a = Block::new(&b"a"[..]);
        let one = encode_car_file(vec![a.cid()], [a.clone()]).unwrap();
        let two = encode_car_file(vec![a.cid()], [a]).unwrap();
        assert_eq!(one.cid, two.cid);
    }

    #[test]
    fn tampered_block_is_rejected() {
        let a = Block::new(&b"hello"[..]);
        let car = encode_car_file(vec![a.cid()], [a]).unwrap();
        let mut bytes = car.bytes.to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let err = CarReader::from_bytes(bytes).unwrap_err();
        assert!(matches!(err, CarError::HashMismatch { .. }));
    }

    #[test]
    fn truncated_container_is_rejected() {
        let a = Block::new(&b"hello world"[..]);
        let car = encode_car_file(vec![a.cid()], [a]).unwrap();
        let bytes = car.bytes.slice(..car.bytes.len() - 3);
        assert!(matches!(
            CarReader::from_bytes(bytes),
            Err(CarError::Corrupt { .. })
        ));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(CarReader::from_bytes(Vec::new()).is_err());
    }

    // ---- header ----

    #[test]
    fn header_is_tagged() {
        let head = vec![Cid::from_bytes(b"e1")];
        let block = header_block(head.clone());
        let json: serde_json::Value = serde_json::from_slice(block.bytes()).unwrap();
        assert_eq!(json["type"], "data");

        let header = CarHeader::from_block(&block).unwrap();
        assert_eq!(header.head(), Some(head.as_slice()));
        assert!(header.cars().is_empty());
        assert!(header.compact().is_empty());
    }

    #[test]
    fn index_header_has_no_head() {
        let mut indexes = std::collections::BTreeMap::new();
        indexes.insert("by_age".to_string(), Cid::from_bytes(b"root"));
        let cars = vec![Cid::from_bytes(b"car1")];
        let header = CarHeader::new(CommitMeta::Index { indexes }, cars.clone(), vec![]);
        let decoded = CarHeader::from_block(&header.to_block().unwrap()).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.head(), None);
        assert_eq!(decoded.cars(), cars.as_slice());
    }

    #[test]
    fn non_header_block_is_invalid() {
        let err = CarHeader::from_block(&Block::new(&b"{\"type\":\"other\"}"[..])).unwrap_err();
        assert!(matches!(err, CarError::InvalidHeader(_)));
    }

    proptest! {
        #[test]
        fn any_batch_reads_back(payloads in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 0..128), 1..16)
        ) {
            let blocks: Vec<Block> = payloads.into_iter().map(Block::new).collect();
            let root = blocks[0].cid();
            let car = encode_car_file(vec![root], blocks.clone()).unwrap();
            let reader = CarReader::from_bytes(car.bytes).unwrap();
            for block in &blocks {
                prop_assert_eq!(reader.get(&block.cid()), Some(block));
            }
        }
    }
}
