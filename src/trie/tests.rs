use hex_literal::hex;

use crate::bytes::Bytes;
use crate::crypto::{keccak256, Hash32};
use crate::exceptions::TrieException;
use crate::rlp::{self, Item};
use crate::store::{MemoryStore, Store};
use crate::trie::Trie;

const EMPTY_TRIE_ROOT: [u8; 32] =
    hex!("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421");

fn root_of(pairs: &[(&[u8], &[u8])]) -> Hash32 {
    let mut db = MemoryStore::new();
    let mut trie = Trie::new(&mut db);
    for (key, value) in pairs {
        trie.put(key, value).unwrap();
    }
    trie.root_hash().unwrap()
}

/// Deterministic key/value pairs, seeded through keccak so runs are
/// reproducible without a randomness dependency.
fn generated_pairs(case: u8, count: usize) -> Vec<(Bytes, Bytes)> {
    (0..count)
        .map(|i| {
            let key = keccak256(&[case, i as u8, 0xa5]);
            let len = 1 + (i * 7) % 40;
            let value: Vec<u8> = (0..len).map(|j| (j as u8) ^ key.0[j % 32]).collect();
            (Bytes::from(key.0), Bytes(value))
        })
        .collect()
}

#[test]
fn empty_trie_root() {
    let mut db = MemoryStore::new();
    let mut trie = Trie::new(&mut db);
    assert_eq!(trie.root_hash().unwrap(), Hash32::from(EMPTY_TRIE_ROOT));
    assert_eq!(*trie.empty_trie_hash(), keccak256(&[0x80]));
    assert_eq!(trie.get(&[1, 2, 3]).unwrap(), None);
}

#[test]
fn single_put_stores_one_leaf() {
    let mut db = MemoryStore::new();
    let root = {
        let mut trie = Trie::new(&mut db);
        trie.put(&[0x01, 0x02], &[0xaa]).unwrap();
        assert_eq!(trie.get(&[0x01, 0x02]).unwrap(), Some(Bytes::from([0xaa])));
        trie.root_hash().unwrap()
    };
    assert_eq!(db.len(), 1);

    // the one stored record is a leaf whose packed key holds the four
    // nibbles 0,1,0,2 with the terminator flag set
    let stored = db.get(&root).unwrap();
    let Item::List(items) = rlp::decode(&stored).unwrap() else {
        panic!("leaf record must decode to a list");
    };
    assert_eq!(items.len(), 2);
    assert_eq!(items[0], Item::Str(Bytes::from([0x20, 0x01, 0x02])));
    assert_eq!(items[1], Item::Str(Bytes::from([0xaa])));
}

#[test]
fn keys_without_common_prefix_split_into_a_branch() {
    let mut db = MemoryStore::new();
    let root = {
        let mut trie = Trie::new(&mut db);
        trie.put(&[0x10], &[0xaa]).unwrap();
        trie.put(&[0x20], &[0xbb]).unwrap();
        assert_eq!(trie.get(&[0x10]).unwrap(), Some(Bytes::from([0xaa])));
        assert_eq!(trie.get(&[0x20]).unwrap(), Some(Bytes::from([0xbb])));
        trie.root_hash().unwrap()
    };

    // no shared nibble: the root is a branch with two inline leaves
    let stored = db.get(&root).unwrap();
    let Item::List(items) = rlp::decode(&stored).unwrap() else {
        panic!("branch record must decode to a list");
    };
    assert_eq!(items.len(), 17);
    assert!(matches!(&items[1], Item::List(_)));
    assert!(matches!(&items[2], Item::List(_)));
}

#[test]
fn delete_compacts_back_to_a_leaf() {
    let mut db = MemoryStore::new();
    let mut trie = Trie::new(&mut db);
    trie.put(&[0x10], &[0xaa]).unwrap();
    trie.put(&[0x20], &[0xbb]).unwrap();
    trie.delete(&[0x10]).unwrap();
    let root = trie.root_hash().unwrap();
    assert_eq!(root, root_of(&[(&[0x20], &[0xbb])]));
}

#[test]
fn replacing_a_value_matches_a_fresh_insert() {
    let mut db = MemoryStore::new();
    let mut trie = Trie::new(&mut db);
    trie.put(b"key", b"first").unwrap();
    trie.put(b"key", b"second").unwrap();
    assert_eq!(trie.get(b"key").unwrap(), Some(Bytes::from(b"second")));
    assert_eq!(trie.root_hash().unwrap(), root_of(&[(b"key", b"second")]));
}

#[test]
fn any_order_fixture_root() {
    // trieanyorder.json fixture
    let pairs: [(&[u8], &[u8]); 4] = [
        (b"do", b"verb"),
        (b"dog", b"puppy"),
        (b"doge", b"coin"),
        (b"horse", b"stallion"),
    ];
    let expected =
        Hash32::from(hex!("5991bb8c6514148a29db676a14ac506cd2cd5775ace63c30a4fe457715e9ac84"));
    assert_eq!(root_of(&pairs), expected);

    let mut reversed = pairs;
    reversed.reverse();
    assert_eq!(root_of(&reversed), expected);
}

#[test]
fn nested_prefix_fixture_root() {
    // go-ethereum's TestInsert fixture
    let pairs: [(&[u8], &[u8]); 3] = [
        (b"doe", b"reindeer"),
        (b"dog", b"puppy"),
        (b"dogglesworth", b"cat"),
    ];
    let expected =
        Hash32::from(hex!("8aad789dff2f538bca5d8ea56e8abe10f4c7ba3a5dea95fea4cd6e7c3a1168d3"));
    assert_eq!(root_of(&pairs), expected);
}

#[test]
fn prefix_keys_live_in_branch_value_slots() {
    let mut db = MemoryStore::new();
    let mut trie = Trie::new(&mut db);
    trie.put(&[0x12], &[0x01]).unwrap();
    trie.put(&[0x12, 0x34], &[0x02]).unwrap();
    trie.put(&[0x12, 0x35], &[0x03]).unwrap();
    assert_eq!(trie.get(&[0x12]).unwrap(), Some(Bytes::from([0x01])));
    assert_eq!(trie.get(&[0x12, 0x34]).unwrap(), Some(Bytes::from([0x02])));
    assert_eq!(trie.get(&[0x12, 0x35]).unwrap(), Some(Bytes::from([0x03])));
    // a path that stops between stored keys holds nothing
    assert_eq!(trie.get(&[0x12, 0x30]).unwrap(), None);
    assert_eq!(trie.get(&[]).unwrap(), None);
}

#[test]
fn insert_get_round_trip() {
    let pairs = generated_pairs(1, 32);
    let mut db = MemoryStore::new();
    let mut trie = Trie::new(&mut db);
    for (key, value) in &pairs {
        trie.put(key, value).unwrap();
    }
    for (key, value) in &pairs {
        assert_eq!(trie.get(key).unwrap(), Some(value.clone()));
    }
    let absent = keccak256(b"never inserted");
    assert_eq!(trie.get(&absent.0).unwrap(), None);
}

#[test]
fn root_hash_is_insertion_order_independent() {
    let pairs = generated_pairs(2, 24);
    let forward = {
        let mut db = MemoryStore::new();
        let mut trie = Trie::new(&mut db);
        for (key, value) in &pairs {
            trie.put(key, value).unwrap();
        }
        trie.root_hash().unwrap()
    };
    let reverse = {
        let mut db = MemoryStore::new();
        let mut trie = Trie::new(&mut db);
        for (key, value) in pairs.iter().rev() {
            trie.put(key, value).unwrap();
        }
        trie.root_hash().unwrap()
    };
    let interleaved = {
        let mut db = MemoryStore::new();
        let mut trie = Trie::new(&mut db);
        for (key, value) in pairs.iter().step_by(2).chain(pairs.iter().skip(1).step_by(2)) {
            trie.put(key, value).unwrap();
        }
        trie.root_hash().unwrap()
    };
    assert_eq!(forward, reverse);
    assert_eq!(forward, interleaved);
}

#[test]
fn delete_is_idempotent() {
    let pairs = generated_pairs(3, 12);
    let mut db = MemoryStore::new();
    let mut trie = Trie::new(&mut db);
    for (key, value) in &pairs {
        trie.put(key, value).unwrap();
    }
    trie.delete(&pairs[0].0).unwrap();
    let once = trie.root_hash().unwrap();
    trie.delete(&pairs[0].0).unwrap();
    assert_eq!(trie.root_hash().unwrap(), once);
    assert_eq!(trie.get(&pairs[0].0).unwrap(), None);
}

#[test]
fn put_then_delete_restores_the_root() {
    let pairs = generated_pairs(4, 12);
    let mut db = MemoryStore::new();
    let mut trie = Trie::new(&mut db);
    for (key, value) in &pairs {
        trie.put(key, value).unwrap();
    }
    let before = trie.root_hash().unwrap();

    trie.put(b"transient-key", b"transient-value").unwrap();
    assert_ne!(trie.root_hash().unwrap(), before);
    trie.delete(b"transient-key").unwrap();
    assert_eq!(trie.root_hash().unwrap(), before);
}

#[test]
fn put_of_an_empty_value_deletes() {
    let pairs = generated_pairs(5, 8);
    let mut db = MemoryStore::new();
    let mut trie = Trie::new(&mut db);
    for (key, value) in &pairs {
        trie.put(key, value).unwrap();
    }
    let before = trie.root_hash().unwrap();
    trie.put(b"short-lived", b"x").unwrap();
    trie.put(b"short-lived", b"").unwrap();
    assert_eq!(trie.get(b"short-lived").unwrap(), None);
    assert_eq!(trie.root_hash().unwrap(), before);
}

#[test]
fn unknown_key_get_and_delete_are_safe() {
    let mut db = MemoryStore::new();
    let mut trie = Trie::new(&mut db);
    trie.put(b"known-a", &[0xaa]).unwrap();
    trie.put(b"known-b", &[0xbb]).unwrap();
    let before = trie.root_hash().unwrap();

    // missing branch slot, mismatched leaf, and short key
    assert_eq!(trie.get(b"unknown").unwrap(), None);
    trie.delete(b"unknown").unwrap();
    trie.delete(b"known").unwrap();
    trie.delete(b"").unwrap();
    assert_eq!(trie.root_hash().unwrap(), before);
}

#[test]
fn empty_trie_hash_is_stable() {
    let empty = Hash32::from(EMPTY_TRIE_ROOT);
    let mut db = MemoryStore::new();
    let mut trie = Trie::new(&mut db);
    assert_eq!(trie.root_hash().unwrap(), empty);

    trie.put(b"key", b"value").unwrap();
    trie.delete(b"key").unwrap();
    assert_eq!(trie.root_hash().unwrap(), empty);

    trie.put(b"key", b"value").unwrap();
    trie.set_root(Some(empty.clone()));
    assert_eq!(trie.root_hash().unwrap(), empty);
    assert_eq!(trie.get(b"key").unwrap(), None);

    trie.set_root(None);
    assert_eq!(trie.root_hash().unwrap(), empty);
}

#[test]
fn persistence_cycle() {
    let pairs = generated_pairs(6, 24);
    let mut db = MemoryStore::new();
    let root = {
        let mut trie = Trie::new(&mut db);
        for (key, value) in &pairs {
            trie.put(key, value).unwrap();
        }
        assert!(trie.flush().unwrap());
        assert!(!trie.flush().unwrap());
        trie.root_hash().unwrap()
    };

    let mut trie = Trie::new(&mut db);
    trie.set_root(Some(root));
    for (key, value) in &pairs {
        assert_eq!(trie.get(key).unwrap(), Some(value.clone()));
    }
}

#[test]
fn mutation_through_a_root_stub() {
    let pairs = generated_pairs(7, 12);
    let mut db = MemoryStore::new();
    let root = {
        let mut trie = Trie::new(&mut db);
        for (key, value) in &pairs {
            trie.put(key, value).unwrap();
        }
        trie.root_hash().unwrap()
    };

    let mut trie = Trie::new(&mut db);
    trie.set_root(Some(root.clone()));
    trie.put(b"added-later", b"after the snapshot").unwrap();
    assert_eq!(trie.get(b"added-later").unwrap(), Some(Bytes::from(b"after the snapshot")));
    for (key, value) in &pairs {
        assert_eq!(trie.get(key).unwrap(), Some(value.clone()));
    }
    // removing the addition rolls the root back to the snapshot
    trie.delete(b"added-later").unwrap();
    assert_eq!(trie.root_hash().unwrap(), root);
}

#[test]
fn stored_serializations_are_never_short() {
    let pairs = generated_pairs(8, 40);
    let mut db = MemoryStore::new();
    {
        let mut trie = Trie::new(&mut db);
        for (key, value) in &pairs {
            trie.put(key, value).unwrap();
        }
        trie.root_hash().unwrap();
    }
    // sub-32-byte encodings inline into their parent instead of being stored
    for stored in db.values() {
        assert!(stored.len() >= 32);
    }
}

#[test]
fn values_across_the_inline_threshold() {
    for len in [31usize, 32, 33] {
        let keys =
            [keccak256(&[len as u8, 1]), keccak256(&[len as u8, 2]), keccak256(&[len as u8, 3])];
        let values = [vec![0x11; len], vec![0x22; len], vec![0x33; len]];

        let mut forward_db = MemoryStore::new();
        let mut forward = Trie::new(&mut forward_db);
        for (key, value) in keys.iter().zip(&values) {
            forward.put(&key.0, value).unwrap();
        }
        for (key, value) in keys.iter().zip(&values) {
            assert_eq!(forward.get(&key.0).unwrap(), Some(Bytes(value.clone())));
        }
        let forward_root = forward.root_hash().unwrap();

        let mut reverse_db = MemoryStore::new();
        let mut reverse = Trie::new(&mut reverse_db);
        for (key, value) in keys.iter().zip(&values).rev() {
            reverse.put(&key.0, value).unwrap();
        }
        assert_eq!(reverse.root_hash().unwrap(), forward_root);
    }
}

#[test]
fn missing_store_entry_raises_resolution_error() {
    let mut db = MemoryStore::new();
    let mut trie = Trie::new(&mut db);
    let orphan = Hash32::from([0x42; 32]);
    trie.set_root(Some(orphan.clone()));
    assert_eq!(trie.get(b"anything"), Err(TrieException::ResolutionError(orphan)));
}

#[test]
fn deleting_every_key_empties_the_store() {
    let pairs = generated_pairs(9, 16);
    let mut db = MemoryStore::new();
    {
        let mut trie = Trie::new(&mut db);
        for (key, value) in &pairs {
            trie.put(key, value).unwrap();
            trie.root_hash().unwrap();
        }
        for (key, _) in &pairs {
            trie.delete(key).unwrap();
            trie.root_hash().unwrap();
        }
        assert_eq!(trie.root_hash().unwrap(), Hash32::from(EMPTY_TRIE_ROOT));
    }
    // every superseded node was disposed along the way
    assert!(db.is_empty());
}
