//! Commit history lookup across real commits.

use std::sync::Arc;
use tessera_core::{
    Config, IndexMetadata, IndexView, IsolationLevel, Journal, JournalError, NODE_FANOUT,
};
use tessera_testkit::generators::payload_strategy;
use proptest::prelude::*;

fn journal_with_commits(n: u8) -> (Journal, Vec<u64>) {
    let journal = Journal::open(Config::transient()).unwrap();
    let idx = journal.register_index(IndexMetadata::new("idx")).unwrap();
    let mut times = Vec::new();
    for i in 0..n {
        idx.insert(&[i], &[i]).unwrap();
        times.push(journal.commit().unwrap());
    }
    (journal, times)
}

#[test]
fn find_returns_the_floor_commit() {
    let (journal, times) = journal_with_commits(5);
    let commits = journal.commit_record_index();
    assert_eq!(commits.timestamps(), times);

    assert!(commits.find(times[0] - 1).unwrap().is_none());
    for (i, &t) in times.iter().enumerate() {
        assert_eq!(commits.get(t).unwrap().unwrap().timestamp(), t);
        assert_eq!(commits.find(t).unwrap().unwrap().timestamp(), t);
        assert_eq!(commits.find_next(t).unwrap(), times.get(i + 1).copied());
    }
    let last = *times.last().unwrap();
    assert_eq!(commits.find(last + 1_000).unwrap().unwrap().timestamp(), last);
    assert!(commits.get(last + 1).unwrap().is_none());
}

#[test]
fn commit_counter_follows_the_records() {
    let (journal, times) = journal_with_commits(3);
    for (i, &t) in times.iter().enumerate() {
        let record = journal.commit_record_at(t).unwrap().unwrap();
        assert_eq!(record.counter(), i as u64 + 1);
    }
    assert_eq!(journal.commit_record().counter(), 3);
    assert_eq!(journal.root_block().first_commit_time, times[0]);
}

#[test]
fn records_are_canonical_while_held() {
    let (journal, times) = journal_with_commits(2);
    let commits = journal.commit_record_index();
    let by_get = commits.get(times[0]).unwrap().unwrap();
    let by_find = commits.find(times[1] - 1).unwrap().unwrap();
    assert!(Arc::ptr_eq(&by_get, &by_find));
}

#[test]
fn historical_views_show_each_commit() {
    let (journal, times) = journal_with_commits(4);
    for (i, &t) in times.iter().enumerate() {
        let tx = journal.new_tx(IsolationLevel::ReadOnly(t)).unwrap();
        let view = journal.index_for("idx", tx).unwrap();
        assert_eq!(view.len().unwrap(), i + 1);
        journal.abort_tx(tx).unwrap();
    }
}

#[test]
fn read_only_before_the_first_commit_sees_nothing() {
    let (journal, times) = journal_with_commits(1);
    let tx = journal.new_tx(IsolationLevel::ReadOnly(times[0] - 1)).unwrap();
    assert!(matches!(
        journal.index_for("idx", tx),
        Err(JournalError::NoSuchIndex { .. })
    ));
    assert!(matches!(
        journal.new_tx(IsolationLevel::ReadOnly(0)),
        Err(JournalError::InvalidOperation { .. })
    ));
}

#[test]
fn commit_record_index_grows_by_bounded_steps() {
    let journal = Journal::open(Config::transient()).unwrap();
    let idx = journal.register_index(IndexMetadata::new("idx")).unwrap();
    let commits = 3 * NODE_FANOUT as u32 + 10;

    let mut largest_root = 0;
    for i in 0..commits {
        idx.insert(&i.to_be_bytes(), b"v").unwrap();
        journal.commit().unwrap();
        let root = journal.root_block().commit_record_index;
        assert_eq!(root, journal.commit_record_index().checkpoint_address());
        largest_root = largest_root.max(journal.read(root).unwrap().len());
    }

    assert!(largest_root <= NODE_FANOUT * 20 + 16, "root grew to {largest_root} bytes");
    let index = journal.commit_record_index();
    assert_eq!(index.len(), commits as usize);
    let times = index.timestamps();
    assert!(times.windows(2).all(|w| w[0] < w[1]));
    let middle = times[times.len() / 2];
    assert_eq!(index.find(middle).unwrap().unwrap().timestamp(), middle);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn committed_payloads_read_back(payloads in prop::collection::vec(payload_strategy(), 1..8)) {
        let journal = Journal::open(Config::transient()).unwrap();
        let addresses: Vec<_> = payloads
            .iter()
            .map(|p| journal.write(p).unwrap())
            .collect();
        prop_assert!(journal.commit().unwrap() > 0);
        for (address, payload) in addresses.iter().zip(&payloads) {
            prop_assert_eq!(&journal.read(*address).unwrap(), payload);
        }
    }
}
