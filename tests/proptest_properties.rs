mod common;

use proptest::prelude::*;

use arcpatch::bsdiff;
use arcpatch::fingerprint::{Algorithm, Fingerprint, FingerprintBuilder, LazyFingerprint, LEGACY_SIZE};
use arcpatch::store::{self, PatchRecord, PatchStore};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Streaming and in-memory fingerprints agree, and stay stable across calls.
    #[test]
    fn fingerprint_is_deterministic(data in prop::collection::vec(any::<u8>(), 1..4096)) {
        for algorithm in [Algorithm::ContentHash128, Algorithm::LegacyHash128] {
            let direct = Fingerprint::of_with(&data, algorithm).unwrap();
            let streamed = FingerprintBuilder::from_reader(data.as_slice(), data.len() as u64)
                .unwrap()
                .with_algorithm(algorithm)
                .compute()
                .unwrap();
            let lazy = LazyFingerprint::new(&data).unwrap().with_algorithm(algorithm);

            prop_assert_eq!(direct, streamed);
            prop_assert_eq!(direct, *lazy.get());
            prop_assert_eq!(direct, Fingerprint::of_with(&data, algorithm).unwrap());
            match algorithm {
                Algorithm::ContentHash128 => prop_assert_eq!(direct.size() as usize, data.len()),
                Algorithm::LegacyHash128 => prop_assert_eq!(direct.size(), LEGACY_SIZE),
            }
        }
    }

    /// A diff reconstructs its target exactly, every time.
    #[test]
    fn apply_reconstructs_target(
        old in prop::collection::vec(any::<u8>(), 0..2048),
        new in prop::collection::vec(any::<u8>(), 0..2048),
    ) {
        let patch = common::naive_diff(&old, &new);
        let first = bsdiff::apply(&old, &patch).unwrap();
        let second = bsdiff::apply(&old, &patch).unwrap();
        prop_assert_eq!(&first, &new);
        prop_assert_eq!(first, second);
    }

    /// Payloads cut short of their control and diff streams are rejected.
    #[test]
    fn truncated_patch_is_rejected(
        old in prop::collection::vec(any::<u8>(), 1..512),
        new in prop::collection::vec(any::<u8>(), 1..512),
        cut in 0.0f64..1.0,
    ) {
        let patch = common::naive_diff(&old, &new);
        let header = bsdiff::Header::parse(&patch).unwrap();
        let streams_end = bsdiff::HEADER_LEN + (header.control_len + header.diff_len) as usize;
        let keep = (streams_end as f64 * cut) as usize;
        prop_assert!(bsdiff::apply(&old, &patch[..keep]).is_err());
    }

    /// Arbitrary bytes never panic the store parser.
    #[test]
    fn store_parser_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = store::parse_patch_store(&bytes);
        let _ = store::parse_rename_store(&bytes);
    }

    /// Written stores read back with the same chains.
    #[test]
    fn store_survives_write(
        paths in prop::collection::btree_set("[a-z]{1,8}(/[a-z]{1,8}){0,3}", 1..16),
        diff in prop::collection::vec(any::<u8>(), 0..64),
    ) {
        let mut patches = PatchStore::new();
        for (i, path) in paths.iter().enumerate() {
            let record = if i % 3 == 0 {
                PatchRecord::empty()
            } else {
                PatchRecord::new(Fingerprint::of(path.as_bytes()).unwrap(), diff.clone())
            };
            patches.insert(path, vec![record]);
        }

        let mut bytes = Vec::new();
        store::write_patch_store(&patches, &mut bytes).unwrap();
        let parsed = store::parse_patch_store(&bytes).unwrap();

        prop_assert_eq!(parsed.len(), patches.len());
        for (path, chain) in patches.iter() {
            prop_assert_eq!(parsed.get(path), Some(chain.as_slice()));
        }
    }
}
