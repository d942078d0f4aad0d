//! End-to-end scenarios against a real LMDB environment.

use stakewallet_store::credits::{
    fetch_raw_credit_amount_spent, fetch_raw_credit_spender, IndexedIncidence,
};
use stakewallet_store::multisig::{
    fetch_multisig_out_spent, fetch_multisig_out_spent_verbose, fetch_multisig_out_tree,
    set_multisig_out_spent,
};
use stakewallet_store::{
    canonical_outpoint, CreditKey, DebitKey, Error, MultisigOut, StoreOptions, Tree, TxRecord,
    WalletStore, LATEST_VERSION,
};
use stakewallet_types::{
    Amount, Block, BlockHash, BlockMeta, OutPoint, Timestamp, Transaction, TxHash, TxIn, TxOut,
};

fn test_options() -> StoreOptions {
    StoreOptions {
        map_size: 10 * 1024 * 1024,
    }
}

fn temp_store() -> (tempfile::TempDir, WalletStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = WalletStore::create(dir.path(), &test_options()).expect("create store");
    (dir, store)
}

fn block_meta(height: u32) -> BlockMeta {
    BlockMeta {
        block: Block::new(BlockHash::new([height as u8; 32]), height),
        time: Timestamp::new(1_700_000_000 + height as u64),
        vote_bits: 1,
    }
}

/// A coinbase-like transaction paying `amount` to a single output.
fn coinbase_tx(amount: u64, tag: u8) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxIn {
            prev_hash: TxHash::ZERO,
            prev_index: u32::MAX,
            sig_script: vec![tag],
            sequence: u32::MAX,
        }],
        outputs: vec![TxOut {
            amount: Amount::new(amount),
            pk_script: vec![0x76, 0xa9, 0x14, tag],
        }],
        lock_time: 0,
        expiry: 0,
    }
}

/// A transaction spending `prev` and paying `amount` to a single output.
fn spending_tx(prev: OutPoint, amount: u64, tag: u8) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxIn {
            prev_hash: prev.hash,
            prev_index: prev.index,
            sig_script: vec![tag, tag],
            sequence: u32::MAX,
        }],
        outputs: vec![TxOut {
            amount: Amount::new(amount),
            pk_script: vec![0x76, 0xa9, 0x14, tag],
        }],
        lock_time: 0,
        expiry: 0,
    }
}

/// Assert the quantified store invariants over the given credit keys.
fn assert_invariants(store: &WalletStore, credit_keys: &[CreditKey]) {
    store
        .view(|txn| {
            // Balance identity: `bal` equals the sum over unspent credits.
            let mut unspent_total = Amount::ZERO;
            let mut unspent_count = 0usize;
            for k in credit_keys {
                let Some(v) = store.exists_raw_credit(txn, k)? else {
                    continue;
                };
                let (amount, spent) = fetch_raw_credit_amount_spent(&v)?;
                if !spent {
                    unspent_total = unspent_total.checked_add(amount).expect("no overflow");
                    unspent_count += 1;

                    // Unspent bijection: composing the index entry yields
                    // this exact credit key.
                    let composed = store
                        .exists_unspent(txn, &k.outpoint())?
                        .expect("unspent credit must be indexed");
                    assert_eq!(&composed, k);
                } else {
                    assert!(
                        store.exists_unspent(txn, &k.outpoint())?.is_none(),
                        "spent credit must not be indexed"
                    );
                }
            }
            assert_eq!(store.fetch_mined_balance(txn)?, unspent_total);

            // No dangling unspent-index entries.
            let mut index_entries = 0usize;
            for item in store.unspent_outputs(txn)? {
                let (outpoint, _) = item?;
                let composed = store
                    .exists_unspent(txn, &outpoint)?
                    .expect("iterated entry exists");
                assert!(
                    store.exists_raw_credit(txn, &composed)?.is_some(),
                    "unspent index entry without credit"
                );
                index_entries += 1;
            }
            assert_eq!(index_entries, unspent_count);

            // Block record consistency: every listed hash has a mined tx
            // record at the same position.
            for rec in store.blocks_from(txn, 0)? {
                let rec = rec?;
                for hash in &rec.tx_hashes {
                    assert!(
                        store.exists_tx_record(txn, hash, &rec.block)?.is_some(),
                        "block lists tx without record"
                    );
                }
            }

            // Debit-credit link: every debit's embedded credit key points
            // at an existing credit marked spent by exactly this debit.
            for item in store.all_debits(txn)? {
                let (debit_key, amount, cred_key) = item?;
                let v = store
                    .exists_raw_credit(txn, &cred_key)?
                    .expect("debit references missing credit");
                let (credit_amount, spent) = fetch_raw_credit_amount_spent(&v)?;
                assert!(spent, "debited credit must be marked spent");
                assert_eq!(credit_amount, amount);
                let spender = fetch_raw_credit_spender(&v)?
                    .expect("spent credit carries a back-reference");
                assert_eq!(spender.tx_hash, debit_key.tx_hash());
                assert_eq!(spender.block.height, debit_key.height());
                assert_eq!(spender.block.hash, debit_key.block_hash());
                assert_eq!(spender.index, debit_key.index());
            }

            // Unmined integrity: inputs indexed to their spender, credits
            // backed by an unmined record.
            for rec in store.unmined_txs(txn)? {
                let rec = rec?;
                for input in &rec.tx.inputs {
                    let k = canonical_outpoint(&input.prev_hash, input.prev_index);
                    assert_eq!(store.exists_raw_unmined_input(txn, &k)?, Some(rec.hash));
                }
                for credit in store.unmined_credits_for_tx(txn, &rec.hash)? {
                    let credit = credit?;
                    assert_eq!(credit.outpoint.hash, rec.hash);
                    assert!(store.exists_raw_unmined(txn, &rec.hash)?.is_some());
                }
            }

            // Multisig mirror: membership in the unspent set matches the
            // record's spent flag, with no dangling entries either way.
            for item in store.multisig_outputs(txn)? {
                let out = item?;
                let k = canonical_outpoint(&out.outpoint.hash, out.outpoint.index);
                assert_eq!(store.exists_multisig_out_unspent(txn, &k)?, !out.spent);
            }
            for item in store.multisig_unspent_outpoints(txn)? {
                let outpoint = item?;
                let k = canonical_outpoint(&outpoint.hash, outpoint.index);
                let v = store
                    .exists_multisig_out(txn, &k)?
                    .expect("unspent set entry without multisig record");
                assert!(!fetch_multisig_out_spent(&v));
            }
            Ok(())
        })
        .expect("invariant check");
}

#[test]
fn s1_fresh_store_create_then_open() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let store = WalletStore::create(dir.path(), &test_options()).expect("create");
        store
            .view(|txn| {
                assert_eq!(store.version(txn)?, LATEST_VERSION);
                assert_eq!(store.fetch_mined_balance(txn)?, Amount::ZERO);
                assert!(store.created_at(txn)?.as_secs() > 0);
                Ok(())
            })
            .expect("view");
    }

    let store = WalletStore::open(dir.path(), &test_options()).expect("open");
    store
        .view(|txn| {
            assert_eq!(store.version(txn)?, LATEST_VERSION);
            assert_eq!(store.fetch_mined_balance(txn)?, Amount::ZERO);
            Ok(())
        })
        .expect("view");
}

#[test]
fn create_refuses_occupied_namespace() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        WalletStore::create(dir.path(), &test_options()).expect("create");
    }
    let err = WalletStore::create(dir.path(), &test_options());
    assert!(matches!(err, Err(Error::AlreadyExists)));
}

#[test]
fn open_without_store_is_no_exists() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = WalletStore::open(dir.path(), &test_options());
    assert!(matches!(err, Err(Error::NoExists)));
}

#[test]
fn s2_insert_and_spend_mined_credit() {
    let (_dir, store) = temp_store();

    const AMOUNT: u64 = 500_000_000;
    let meta100 = block_meta(100);
    let rec = TxRecord::new(coinbase_tx(AMOUNT, 7), Timestamp::new(1_700_000_100));

    store
        .update(|txn| {
            store.insert_mined_tx(txn, &rec, &meta100)?;
            assert!(store.add_credit(txn, &rec, &meta100, 0, false, 0)?);
            // Re-adding the same credit is a no-op.
            assert!(!store.add_credit(txn, &rec, &meta100, 0, false, 0)?);
            Ok(())
        })
        .expect("insert credit");

    let outpoint = OutPoint::new(rec.hash, 0);
    let cred_key = store
        .view(|txn| {
            assert_eq!(store.fetch_mined_balance(txn)?, Amount::new(AMOUNT));
            Ok(store.exists_unspent(txn, &outpoint)?.expect("indexed"))
        })
        .expect("view");
    assert_invariants(&store, &[cred_key]);

    // A later transaction spends the credit at height 101.
    let meta101 = block_meta(101);
    let spend_rec = TxRecord::new(
        spending_tx(outpoint, AMOUNT - 10_000, 9),
        Timestamp::new(1_700_000_200),
    );

    store
        .update(|txn| {
            store.insert_mined_tx(txn, &spend_rec, &meta101)?;
            let amount = store.add_debit(txn, &spend_rec, &meta101, 0, &cred_key)?;
            assert_eq!(amount, Amount::new(AMOUNT));
            Ok(())
        })
        .expect("spend credit");

    store
        .view(|txn| {
            assert_eq!(store.fetch_mined_balance(txn)?, Amount::ZERO);
            assert!(store.exists_unspent(txn, &outpoint)?.is_none());

            let v = store
                .exists_raw_credit(txn, &cred_key)?
                .expect("credit still recorded");
            let (_, spent) = fetch_raw_credit_amount_spent(&v)?;
            assert!(spent);

            // The back-reference identifies the debit exactly.
            let spender = fetch_raw_credit_spender(&v)?.expect("spender recorded");
            assert_eq!(
                spender,
                IndexedIncidence {
                    tx_hash: spend_rec.hash,
                    block: meta101.block,
                    index: 0,
                }
            );

            let (debit_key, consumed) = store
                .exists_debit(txn, &spend_rec.hash, 0, &meta101.block)?
                .expect("debit recorded");
            assert_eq!(consumed, cred_key);
            assert_eq!(debit_key, DebitKey::new(&spend_rec.hash, 0, &meta101.block));
            Ok(())
        })
        .expect("view");
    assert_invariants(&store, &[cred_key]);
}

#[test]
fn s3_unmined_credit_becomes_mined() {
    let (_dir, store) = temp_store();

    const AMOUNT: u64 = 10_000_000;
    let prev = OutPoint::new(TxHash::new([0x55; 32]), 1);
    let rec = TxRecord::new(spending_tx(prev, AMOUNT, 3), Timestamp::new(1_700_000_300));

    store
        .update(|txn| {
            store.insert_unmined_tx(txn, &rec)?;
            store.add_unmined_credit(txn, &rec, 0, false, 0)?;
            Ok(())
        })
        .expect("insert unmined");

    store
        .view(|txn| {
            assert_eq!(store.fetch_mined_balance(txn)?, Amount::ZERO);
            assert!(store.exists_raw_unmined(txn, &rec.hash)?.is_some());
            let k = canonical_outpoint(&rec.hash, 0);
            assert!(store.exists_raw_unmined_credit(txn, &k)?.is_some());
            let prev_k = canonical_outpoint(&prev.hash, prev.index);
            assert_eq!(store.exists_raw_unmined_input(txn, &prev_k)?, Some(rec.hash));
            Ok(())
        })
        .expect("view");
    assert_invariants(&store, &[]);

    // Mine it at height 200.
    let meta = block_meta(200);
    store
        .update(|txn| {
            store.mine_unmined_tx(txn, &rec, &meta)?;
            store.add_credit(txn, &rec, &meta, 0, false, 0)?;
            Ok(())
        })
        .expect("mine");

    let cred_key = CreditKey::new(&rec.hash, 0, &meta.block);
    store
        .view(|txn| {
            assert_eq!(store.fetch_mined_balance(txn)?, Amount::new(AMOUNT));
            assert!(store.exists_raw_unmined(txn, &rec.hash)?.is_none());
            let k = canonical_outpoint(&rec.hash, 0);
            assert!(store.exists_raw_unmined_credit(txn, &k)?.is_none());
            let prev_k = canonical_outpoint(&prev.hash, prev.index);
            assert!(store.exists_raw_unmined_input(txn, &prev_k)?.is_none());

            let block_rec = store.fetch_block_record(txn, 200)?;
            assert_eq!(block_rec.tx_hashes, vec![rec.hash]);
            Ok(())
        })
        .expect("view");
    assert_invariants(&store, &[cred_key]);
}

#[test]
fn s4_reverse_block_scan() {
    let (_dir, store) = temp_store();

    store
        .update(|txn| {
            for height in [100u32, 150, 200] {
                let meta = block_meta(height);
                store.put_block_record(txn, &meta, &TxHash::new([height as u8; 32]))?;
            }
            Ok(())
        })
        .expect("insert blocks");

    store
        .view(|txn| {
            let heights: Vec<u32> = store
                .blocks_rev(txn)?
                .map(|r| r.map(|rec| rec.block.height))
                .collect::<Result<_, _>>()?;
            assert_eq!(heights, vec![200, 150, 100]);

            let forward: Vec<u32> = store
                .blocks_from(txn, 101)?
                .map(|r| r.map(|rec| rec.block.height))
                .collect::<Result<_, _>>()?;
            assert_eq!(forward, vec![150, 200]);
            Ok(())
        })
        .expect("scan");
}

#[test]
fn s5_latest_incarnation_of_tx_hash() {
    let (_dir, store) = temp_store();

    let rec = TxRecord::new(coinbase_tx(1_000, 2), Timestamp::new(1_700_000_400));
    let meta100 = block_meta(100);
    let meta120 = block_meta(120);

    store
        .update(|txn| {
            store.put_tx_record(txn, &rec, &meta100.block)?;
            store.put_tx_record(txn, &rec, &meta120.block)?;
            Ok(())
        })
        .expect("insert records");

    store
        .view(|txn| {
            let (k, _) = store
                .latest_tx_record(txn, &rec.hash)?
                .expect("record found");
            assert_eq!(k.height(), 120);
            assert_eq!(k.block_hash(), meta120.block.hash);

            assert!(store
                .latest_tx_record(txn, &TxHash::new([0xee; 32]))?
                .is_none());
            Ok(())
        })
        .expect("view");
}

#[test]
fn s6_multisig_spend() {
    let (_dir, store) = temp_store();

    let outpoint = OutPoint::new(TxHash::new([0x42; 32]), 0);
    let out = MultisigOut {
        outpoint,
        script_hash: [0x33; 20],
        m: 2,
        n: 3,
        spent: false,
        tree: Tree::Stake,
        block: block_meta(50).block,
        amount: Amount::new(250_000),
        spent_by: TxHash::ZERO,
        spent_by_index: u32::MAX,
        tx_hash: outpoint.hash,
    };
    let k = canonical_outpoint(&outpoint.hash, outpoint.index);

    store
        .update(|txn| {
            store.put_multisig_out(txn, &out)?;
            store.put_multisig_out_unspent(txn, &k)?;
            Ok(())
        })
        .expect("insert multisig");

    store
        .view(|txn| {
            assert!(store.exists_multisig_out_unspent(txn, &k)?);
            Ok(())
        })
        .expect("view");
    assert_invariants(&store, &[]);

    let spender = TxHash::new([0x66; 32]);
    store
        .update(|txn| {
            let mut v = store
                .exists_multisig_out(txn, &k)?
                .expect("record present");
            set_multisig_out_spent(&mut v, &spender, 1);
            store.put_multisig_out_raw_values(txn, &k, &v)?;
            store.delete_multisig_out_unspent(txn, &k)?;
            Ok(())
        })
        .expect("spend multisig");

    store
        .view(|txn| {
            let v = store.exists_multisig_out(txn, &k)?.expect("record present");
            let (spent, by, index) = fetch_multisig_out_spent_verbose(&v);
            assert!(spent);
            assert_eq!(by, spender);
            assert_eq!(index, 1);
            assert_eq!(fetch_multisig_out_tree(&v), Tree::Stake);
            assert!(!store.exists_multisig_out_unspent(txn, &k)?);
            Ok(())
        })
        .expect("view");
    assert_invariants(&store, &[]);

    // The composed operations keep the unspent set in lockstep both ways.
    store
        .update(|txn| store.unspend_multisig_out(txn, &k))
        .expect("unspend multisig");
    store
        .view(|txn| {
            let v = store.exists_multisig_out(txn, &k)?.expect("record present");
            let (spent, by, index) = fetch_multisig_out_spent_verbose(&v);
            assert!(!spent);
            assert!(by.is_zero());
            assert_eq!(index, u32::MAX);
            assert!(store.exists_multisig_out_unspent(txn, &k)?);
            Ok(())
        })
        .expect("view");
    assert_invariants(&store, &[]);

    store
        .update(|txn| store.spend_multisig_out(txn, &k, &spender, 2))
        .expect("respend multisig");
    store
        .view(|txn| {
            let v = store.exists_multisig_out(txn, &k)?.expect("record present");
            assert!(fetch_multisig_out_spent_verbose(&v).0);
            assert!(!store.exists_multisig_out_unspent(txn, &k)?);
            Ok(())
        })
        .expect("view");
    assert_invariants(&store, &[]);
}

#[test]
fn spend_unspend_roundtrip_restores_credit() {
    let (_dir, store) = temp_store();

    const AMOUNT: u64 = 77_000;
    let meta = block_meta(10);
    let rec = TxRecord::new(coinbase_tx(AMOUNT, 4), Timestamp::new(1_700_000_500));

    store
        .update(|txn| {
            store.insert_mined_tx(txn, &rec, &meta)?;
            store.add_credit(txn, &rec, &meta, 0, false, 0)?;
            Ok(())
        })
        .expect("insert");

    let cred_key = CreditKey::new(&rec.hash, 0, &meta.block);
    let before = store
        .view(|txn| Ok(store.exists_raw_credit(txn, &cred_key)?.expect("credit")))
        .expect("view");

    let meta11 = block_meta(11);
    let spend_rec = TxRecord::new(
        spending_tx(OutPoint::new(rec.hash, 0), AMOUNT, 5),
        Timestamp::new(1_700_000_600),
    );

    store
        .update(|txn| {
            store.insert_mined_tx(txn, &spend_rec, &meta11)?;
            let spent_amount = store.add_debit(txn, &spend_rec, &meta11, 0, &cred_key)?;
            let returned = store
                .remove_debit(txn, &spend_rec, &meta11, 0)?
                .expect("debit existed");
            assert_eq!(spent_amount, returned);
            assert_eq!(spent_amount, Amount::new(AMOUNT));
            Ok(())
        })
        .expect("spend and unspend");

    store
        .view(|txn| {
            assert_eq!(store.fetch_mined_balance(txn)?, Amount::new(AMOUNT));
            let after = store.exists_raw_credit(txn, &cred_key)?.expect("credit");
            // Amount bytes and the spent bit are restored.
            assert_eq!(after[..9], before[..9]);
            assert!(store.exists_unspent(txn, &OutPoint::new(rec.hash, 0))?.is_some());
            Ok(())
        })
        .expect("view");
    assert_invariants(&store, &[cred_key]);
}

#[test]
fn chain_height_probes_consecutive_records() {
    let (_dir, store) = temp_store();

    store
        .update(|txn| {
            for height in [5u32, 6, 7, 20] {
                let meta = block_meta(height);
                store.put_block_record(txn, &meta, &TxHash::new([height as u8; 32]))?;
            }
            Ok(())
        })
        .expect("insert blocks");

    store
        .view(|txn| {
            assert_eq!(store.chain_height(txn, 5)?, 7);
            assert_eq!(store.chain_height(txn, 20)?, 20);
            assert!(store.chain_height(txn, 100).is_err());
            Ok(())
        })
        .expect("view");
}

#[test]
fn block_tx_append_and_remove() {
    let (_dir, store) = temp_store();

    let meta = block_meta(30);
    let first = TxHash::new([1; 32]);
    let second = TxHash::new([2; 32]);

    store
        .update(|txn| {
            store.put_block_record(txn, &meta, &first)?;
            store.append_block_tx(txn, 30, &second)?;
            Ok(())
        })
        .expect("append");

    store
        .view(|txn| {
            let rec = store.fetch_block_record(txn, 30)?;
            assert_eq!(rec.tx_hashes, vec![first, second]);
            Ok(())
        })
        .expect("view");

    store
        .update(|txn| store.remove_block_tx(txn, 30, &first))
        .expect("remove");

    store
        .view(|txn| {
            let rec = store.fetch_block_record(txn, 30)?;
            assert_eq!(rec.tx_hashes, vec![second]);
            assert_eq!(rec.meta(), meta);
            Ok(())
        })
        .expect("view");
}

#[test]
fn failed_update_rolls_back() {
    let (_dir, store) = temp_store();

    let meta = block_meta(77);
    let result: Result<(), Error> = store.update(|txn| {
        store.put_block_record(txn, &meta, &TxHash::new([7; 32]))?;
        Err(Error::Input("forced failure".to_string()))
    });
    assert!(result.is_err());

    store
        .view(|txn| {
            assert!(store.exists_block_record(txn, 77)?.is_none());
            Ok(())
        })
        .expect("view");
}

#[test]
fn script_store_roundtrip_is_idempotent() {
    let (_dir, store) = temp_store();

    let script = vec![0x52, 0x21, 0x03, 0x99];
    let hash = stakewallet_store::script_hash(&script);

    store
        .update(|txn| {
            store.put_script(txn, &script)?;
            // Re-putting an identical script is a no-op.
            store.put_script(txn, &script)?;
            Ok(())
        })
        .expect("put script");

    store
        .view(|txn| {
            let mut fetched = store.fetch_script(txn, &hash)?.expect("script stored");
            assert_eq!(fetched, script);
            // The returned bytes are a copy; mutating them does not affect
            // the store.
            fetched[0] = 0xff;
            assert_eq!(store.fetch_script(txn, &hash)?.expect("still stored"), script);
            assert!(store.exists_script(txn, &hash)?);
            Ok(())
        })
        .expect("view");
}

#[test]
fn version_1_store_is_upgraded_on_open() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        WalletStore::create(dir.path(), &test_options()).expect("create");
    }

    // Rewind the stored version to 1, as a store written by the previous
    // schema would carry.
    {
        let env = unsafe {
            heed::EnvOpenOptions::new()
                .max_dbs(12)
                .map_size(10 * 1024 * 1024)
                .open(dir.path())
        }
        .expect("raw env");
        let mut wtxn = env.write_txn().expect("write txn");
        let root = env
            .open_database::<heed::types::Bytes, heed::types::Bytes>(&wtxn, Some("root"))
            .expect("open root")
            .expect("root exists");
        root.put(&mut wtxn, b"vers", &1u32.to_be_bytes()).expect("put");
        wtxn.commit().expect("commit");
    }

    let store = WalletStore::open(dir.path(), &test_options()).expect("open upgrades");
    store
        .view(|txn| {
            assert_eq!(store.version(txn)?, LATEST_VERSION);
            Ok(())
        })
        .expect("view");
}

#[test]
fn newer_version_refuses_to_open() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        WalletStore::create(dir.path(), &test_options()).expect("create");
    }

    {
        let env = unsafe {
            heed::EnvOpenOptions::new()
                .max_dbs(12)
                .map_size(10 * 1024 * 1024)
                .open(dir.path())
        }
        .expect("raw env");
        let mut wtxn = env.write_txn().expect("write txn");
        let root = env
            .open_database::<heed::types::Bytes, heed::types::Bytes>(&wtxn, Some("root"))
            .expect("open root")
            .expect("root exists");
        root.put(&mut wtxn, b"vers", &99u32.to_be_bytes()).expect("put");
        wtxn.commit().expect("commit");
    }

    let err = WalletStore::open(dir.path(), &test_options());
    assert!(matches!(
        err,
        Err(Error::UnknownVersion {
            version: 99,
            latest: LATEST_VERSION
        })
    ));
}
