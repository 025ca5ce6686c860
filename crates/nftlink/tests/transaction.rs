//! End-to-end tests of the transaction layer against the in-memory kernel.

use nftlink::netlink::message::NLM_F_ACK;
use nftlink::testing::{FakeKernel, MockTransport, SharedKernel, reply};
use nftlink::{
    Batch, Chain, Control, Error, Family, NftEvent, NftMsg, PendingError, Rule, Session,
    SessionConfig, Set, SetElement, Table,
};

fn session_with(kernel: &SharedKernel) -> Session<MockTransport> {
    Session::with_config(
        MockTransport::with_kernel(kernel.clone()),
        SessionConfig::new().seq_seed(1000),
    )
    .unwrap()
}

#[test]
fn sequence_numbers_increase_across_wraparound() {
    let mut session = Session::with_config(
        MockTransport::new(),
        SessionConfig::new().seq_seed(u32::MAX - 3),
    )
    .unwrap();

    let values: Vec<u32> = (0..8).map(|_| session.next_seq()).collect();
    assert!(values.windows(2).all(|w| w[1] == w[0].wrapping_add(1)));
    assert_eq!(values[4], 0);
}

#[test]
fn batch_readiness() {
    let mut batch = Batch::new();
    batch.begin(1);
    batch.end(2);
    assert!(!batch.is_ready());

    let mut batch = Batch::new();
    batch.begin(1);
    batch
        .add_table(&Table::new(Family::Inet, "t"), 0, 2)
        .unwrap();
    batch.end(3);
    assert!(batch.is_ready());
}

#[tokio::test]
async fn rejected_members_are_reported_by_sequence() {
    let kernel = FakeKernel::new().shared();
    let mut session = session_with(&kernel);

    let mut batch = Batch::new();
    batch.begin(session.next_seq());
    let mut seqs = Vec::new();
    for i in 1..=6 {
        let seq = session.next_seq();
        seqs.push(seq);
        batch
            .add_table(&Table::new(Family::Inet, format!("t{}", i)), 0, seq)
            .unwrap();
    }
    batch.end(session.next_seq());

    {
        let mut k = kernel.lock().unwrap();
        k.reject_seq(seqs[1], libc::EINVAL);
        k.reject_seq(seqs[4], libc::EPERM);
    }

    let mut errors = Vec::new();
    let err = session.commit(&batch, &mut errors).await.unwrap_err();
    assert!(matches!(err, Error::BatchRejected { failed: 2 }));

    errors.sort_by_key(|e| e.seq);
    assert_eq!(
        errors,
        vec![
            PendingError {
                seq: seqs[1],
                errno: libc::EINVAL
            },
            PendingError {
                seq: seqs[4],
                errno: libc::EPERM
            },
        ]
    );

    // nothing was applied
    let k = kernel.lock().unwrap();
    assert!(k.tables().is_empty());
    assert_eq!(k.generation(), 1);
}

#[tokio::test]
async fn concurrent_change_aborts_dump() {
    let kernel = FakeKernel::new()
        .with_dump_page_size(1)
        .with_table(Table::new(Family::Ip, "a"))
        .with_table(Table::new(Family::Ip, "b"))
        .with_table(Table::new(Family::Ip, "c"))
        .shared();
    let mut session = session_with(&kernel);

    session.refresh_generation().await.unwrap();
    kernel.lock().unwrap().bump_generation_after(1);

    let err = session.dump_tables(Family::Unspec).await.unwrap_err();
    assert!(matches!(err, Error::GenerationChanged { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn aborted_dump_can_be_retried_on_same_session() {
    let kernel = FakeKernel::new()
        .with_dump_page_size(1)
        .with_table(Table::new(Family::Ip, "a"))
        .with_table(Table::new(Family::Ip, "b"))
        .with_table(Table::new(Family::Ip, "c"))
        .shared();
    let mut session = session_with(&kernel);

    session.refresh_generation().await.unwrap();
    kernel.lock().unwrap().bump_generation_after(1);
    let err = session.dump_tables(Family::Unspec).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(session.transport().pending(), 0);

    let ruleset = session.ruleset(Family::Unspec).await.unwrap();
    let names: Vec<_> = ruleset.tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn change_during_rule_dump_fails_whole_snapshot() {
    let kernel = FakeKernel::new()
        .with_dump_page_size(1)
        .with_table(Table::new(Family::Inet, "t"))
        .with_chain(Chain::new(Family::Inet, "t", "input"))
        .with_rule(Rule::new(Family::Inet, "t", "input").with_expressions(vec![1; 4]))
        .with_rule(Rule::new(Family::Inet, "t", "input").with_expressions(vec![2; 4]))
        .with_rule(Rule::new(Family::Inet, "t", "input").with_expressions(vec![3; 4]))
        .shared();
    let mut session = session_with(&kernel);

    // Tables and chains fit one page each, so only the rule dump reaches
    // a second page.
    kernel.lock().unwrap().bump_generation_after(2);
    let err = session.ruleset(Family::Unspec).await.unwrap_err();
    assert!(matches!(err, Error::GenerationChanged { .. }));
    assert!(err.is_retryable());

    let ruleset = session.ruleset(Family::Unspec).await.unwrap();
    assert_eq!(ruleset.rules.len(), 3);
}

#[tokio::test]
async fn failed_element_read_fails_whole_snapshot() {
    let kernel = FakeKernel::new()
        .with_table(Table::new(Family::Inet, "t"))
        .with_set(
            Set::new(Family::Inet, "t", "allow")
                .with_key(7, 4)
                .with_element(SetElement::new([10, 0, 0, 1])),
        )
        .shared();
    let mut session = session_with(&kernel);

    // generation 1000, tables 1001, chains 1002, sets 1003, elements 1004
    kernel.lock().unwrap().reject_seq(1004, libc::ENOENT);
    let err = session.ruleset(Family::Unspec).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(session.transport().pending(), 0);
}

#[tokio::test]
async fn every_acknowledgement_is_drained() {
    let kernel = FakeKernel::new().shared();
    let mut session = session_with(&kernel);

    let mut batch = Batch::new();
    batch.begin(session.next_seq());
    let first = session.next_seq();
    // no such table
    batch
        .add_chain(&Chain::new(Family::Inet, "missing", "c"), NLM_F_ACK, first)
        .unwrap();
    for i in 2..=5 {
        batch
            .add_table(
                &Table::new(Family::Inet, format!("t{}", i)),
                NLM_F_ACK,
                session.next_seq(),
            )
            .unwrap();
    }
    batch.end(session.next_seq());

    let mut errors = Vec::new();
    let err = session.commit(&batch, &mut errors).await.unwrap_err();
    assert!(matches!(err, Error::BatchRejected { failed: 1 }));
    assert_eq!(
        errors,
        vec![PendingError {
            seq: first,
            errno: libc::ENOENT
        }]
    );
    // the four positive acks were consumed too
    assert_eq!(session.transport().pending(), 0);
}

#[test]
fn send_buffer_grows_once() {
    let mut session = Session::from_transport(MockTransport::new()).unwrap();
    session.grow_send_buffer(1 << 20);
    session.grow_send_buffer(1 << 20);
    session.grow_send_buffer(1 << 16);
    assert_eq!(session.transport().force_send_calls(), vec![1 << 20]);
    assert_eq!(session.send_buffer().applied(), 1 << 20);
}

#[tokio::test]
async fn listener_survives_overrun() {
    let transport = MockTransport::new();
    transport.push_error(libc::ENOBUFS);
    transport.push_datagram(
        reply::notification(NftMsg::NewTable, &Table::new(Family::Inet, "late")).unwrap(),
    );
    let mut session = Session::from_transport(transport).unwrap();
    session.subscribe_events().unwrap();

    let mut seen = Vec::new();
    session
        .listen_events(|event| {
            seen.push(event);
            Control::Stop
        })
        .await
        .unwrap();

    assert_eq!(
        seen,
        vec![NftEvent::NewTable(Table::new(Family::Inet, "late"))]
    );
}

#[tokio::test]
async fn listener_reports_other_failures() {
    let transport = MockTransport::new();
    transport.push_error(libc::EBADF);
    let mut session = Session::from_transport(transport).unwrap();
    assert!(session.listen_events(|_| Control::Continue).await.is_err());
}

#[tokio::test]
async fn commit_then_dump() {
    let kernel = FakeKernel::new().shared();
    let mut session = session_with(&kernel);

    let mut batch = Batch::new();
    batch.begin(session.next_seq());
    batch
        .add_table(&Table::new(Family::Inet, "t1"), 0, session.next_seq())
        .unwrap();
    batch
        .add_chain(&Chain::new(Family::Inet, "t1", "c1"), 0, session.next_seq())
        .unwrap();
    batch
        .add_rule(
            &Rule::new(Family::Inet, "t1", "c1").with_expressions(vec![0xab; 12]),
            0,
            session.next_seq(),
        )
        .unwrap();
    batch.end(session.next_seq());

    let mut errors = Vec::new();
    session.commit(&batch, &mut errors).await.unwrap();
    assert!(errors.is_empty());

    session.refresh_generation().await.unwrap();
    let tables = session.dump_tables(Family::Unspec).await.unwrap();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].name, "t1");

    let rules = session.dump_rules(Family::Inet).await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].expressions, vec![0xab; 12]);
}

#[tokio::test]
async fn full_ruleset_with_elements() {
    let kernel = FakeKernel::new()
        .with_table(Table::new(Family::Inet, "t"))
        .with_chain(Chain::new(Family::Inet, "t", "input").with_hook("filter", 1, 0))
        .with_set(
            Set::new(Family::Inet, "t", "allow")
                .with_key(7, 4)
                .with_element(SetElement::new([10, 0, 0, 1]))
                .with_element(SetElement::new([10, 0, 0, 2])),
        )
        .shared();
    let mut session = session_with(&kernel);

    let ruleset = session.ruleset(Family::Unspec).await.unwrap();
    assert_eq!(ruleset.tables.len(), 1);
    assert_eq!(ruleset.chains.len(), 1);
    assert_eq!(ruleset.sets.len(), 1);
    assert_eq!(ruleset.sets[0].elements.len(), 2);
    assert!(ruleset.rules.is_empty());
}

#[tokio::test]
async fn probe_against_batch_aware_kernel() {
    let kernel = FakeKernel::new().shared();
    let mut session = session_with(&kernel);
    assert!(session.batch_supported().await.unwrap());
    assert!(kernel.lock().unwrap().tables().is_empty());
}
