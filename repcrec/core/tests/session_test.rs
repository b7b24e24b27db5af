use repcrec::common::{SiteId, VariableId};
use repcrec::{Database, DatabaseConfig, Error, QueryResult, Session};

fn session() -> Session {
    Database::open_in_memory(&DatabaseConfig::default())
        .unwrap()
        .session()
}

/// Runs a script and returns every event line it produced, in order.
fn run_script(session: &mut Session, script: &str) -> Vec<String> {
    session
        .execute_script(script)
        .unwrap()
        .iter()
        .flat_map(QueryResult::iter)
        .map(ToString::to_string)
        .collect()
}

fn x(index: u32) -> VariableId {
    VariableId::new(index).unwrap()
}

fn site(id: u32) -> SiteId {
    SiteId::new(id).unwrap()
}

#[test]
fn test_shared_upgrade_deadlock_aborts_younger() {
    let mut session = session();
    let events = run_script(
        &mut session,
        r"
begin(T1)
begin(T2)
R(T1,x6)
R(T2,x6)
W(T1,x6,1)
W(T2,x6,2)
end(T1)
end(T2)
",
    );
    assert_eq!(events, vec![
        "T1 begins",
        "T2 begins",
        "T1 reads x6 = 60 at site 1",
        "T2 reads x6 = 60 at site 1",
        "W(T1,x6,1) waits for T2",
        "W(T2,x6,2) waits for T1",
        "deadlock T2 -> T1 -> T2, aborting T2",
        "T2 aborts: deadlock victim",
        "T1 writes x6 = 1 at sites 1,2,3,4,5,6,7,8,9,10",
        "W(T2,x6,2) dropped: transaction aborted",
        "T1 commits",
        "T2 aborts: deadlock victim",
    ]);
}

#[test]
fn test_home_site_failure_leaves_no_qualified_value() {
    let mut session = session();
    let events = run_script(
        &mut session,
        r"
begin(T1)
fail(2)
beginRO(T2)
R(T2,x1)
R(T1,x1)
recover(2)
end(T1)
beginRO(T3)
R(T3,x1)
",
    );
    assert_eq!(events, vec![
        "T1 begins",
        "site 2 fails",
        "T2 begins (read-only)",
        "T2 aborts: no qualified value for x1",
        "R(T1,x1) waits for a site to come up",
        "site 2 recovers",
        "T1 reads x1 = 10 at site 2",
        "T1 commits",
        "T3 begins (read-only)",
        "T3 aborts: no qualified value for x1",
    ]);
}

#[test]
fn test_read_only_waits_for_site_that_failed_after_start() {
    let mut session = session();
    let events = run_script(
        &mut session,
        r"
begin(T1)
beginRO(T2)
fail(2)
R(T2,x1)
R(T1,x2)
fail(7)
recover(2)
end(T1)
end(T2)
",
    );
    assert_eq!(events, vec![
        "T1 begins",
        "T2 begins (read-only)",
        "site 2 fails",
        "R(T2,x1) waits for a site to come up",
        "T1 reads x2 = 20 at site 1",
        "site 7 fails",
        "site 2 recovers",
        "T2 reads x1 = 10 at site 2",
        "T1 commits",
        "T2 commits",
    ]);
}

#[test]
fn test_failure_of_read_source_aborts_reader() {
    let mut session = session();
    let events = run_script(
        &mut session,
        r"
begin(T1)
R(T1,x2)
fail(1)
end(T1)
",
    );
    assert_eq!(&events[1..], [
        "T1 reads x2 = 20 at site 1",
        "site 1 fails",
        "T1 aborts: site 1 failed after it was accessed",
        "T1 aborts: site 1 failed after it was accessed",
    ]);
}

#[test]
fn test_commit_skips_down_sites() {
    let mut session = session();
    run_script(
        &mut session,
        r"
fail(3)
begin(T1)
W(T1,x2,100)
end(T1)
recover(3)
",
    );
    let data = session.manager().data();
    for id in (1..=10).filter(|&id| id != 3) {
        let latest = data.site(site(id)).unwrap().latest(x(2)).unwrap();
        assert_eq!((latest.value, latest.commit_ts.raw()), (100, 4));
    }
    assert_eq!(data.site(site(3)).unwrap().latest(x(2)).unwrap().value, 20);
}

#[test]
fn test_site_failure_aborts_writer() {
    let mut session = session();
    let events = run_script(
        &mut session,
        r"
begin(T1)
W(T1,x4,5)
fail(2)
end(T1)
",
    );
    assert_eq!(&events[2..], [
        "site 2 fails",
        "T1 aborts: site 2 failed after it was accessed",
        "T1 aborts: site 2 failed after it was accessed",
    ]);
    let data = session.manager().data();
    assert_eq!(data.site(site(1)).unwrap().latest(x(4)).unwrap().value, 40);
    assert!(data.sites().all(|s| s.lock_table().is_empty()));
}

#[test]
fn test_read_only_reads_its_snapshot() {
    let mut session = session();
    let events = run_script(
        &mut session,
        r"
begin(T1)
beginRO(T2)
W(T1,x2,5)
end(T1)
R(T2,x2)
end(T2)
",
    );
    assert_eq!(&events[4..], ["T2 reads x2 = 20 at site 1", "T2 commits"]);
}

#[test]
fn test_recovered_replica_is_read_after_rewrite() {
    let mut session = session();
    let events = run_script(
        &mut session,
        r"
fail(1)
recover(1)
begin(T1)
R(T1,x2)
W(T1,x2,7)
end(T1)
beginRO(T2)
R(T2,x2)
",
    );
    assert_eq!(events[3], "T1 reads x2 = 20 at site 2");
    assert_eq!(events[7], "T2 reads x2 = 7 at site 1");
}

#[test]
fn test_script_syntax_error_runs_nothing() {
    let mut session = session();
    let err = session
        .execute_script("begin(T1)\nW(T1,x2)\nend(T1)\n")
        .unwrap_err();
    let Error::Parser(err) = err else {
        panic!("expected a syntax error, got {err:?}");
    };
    assert_eq!(err.position().0, 2);
    assert!(session.manager().active_transactions().next().is_none());
}
