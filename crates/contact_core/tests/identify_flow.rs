use contact_core::db::{open_db, open_db_in_memory};
use contact_core::{
    identify_atomic, Contact, ContactProjection, ContactStore, IdentifyError, IdentifyService,
    LinkPrecedence, MemoryContactStore, Observation, SqliteContactStore,
};
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Barrier};
use std::thread;

fn all_contacts(conn: &Connection) -> Vec<Contact> {
    let store = SqliteContactStore::try_new(conn).unwrap();
    let max_id: i64 = conn
        .query_row("SELECT COALESCE(MAX(id), 0) FROM contacts;", [], |row| {
            row.get(0)
        })
        .unwrap();
    (1..=max_id)
        .filter_map(|id| store.get_contact(id, true).unwrap())
        .collect()
}

fn assert_single_primary_per_cluster(contacts: &[Contact]) {
    let by_id = contacts
        .iter()
        .map(|contact| (contact.id, contact))
        .collect::<BTreeMap<_, _>>();
    for contact in contacts.iter().filter(|contact| contact.is_active()) {
        match contact.link_precedence {
            LinkPrecedence::Primary => assert_eq!(contact.linked_id, None),
            LinkPrecedence::Secondary => {
                let primary_id = contact.linked_id.expect("secondary must link");
                let primary = by_id[&primary_id];
                assert_eq!(
                    primary.link_precedence,
                    LinkPrecedence::Primary,
                    "contact {} links to non-primary {}",
                    contact.id,
                    primary_id
                );
            }
        }
    }
}

#[test]
fn empty_store_creates_primary() {
    let mut conn = open_db_in_memory().unwrap();

    let projection = identify_atomic(&mut conn, &Observation::email("a@x.com")).unwrap();
    assert_eq!(
        projection,
        ContactProjection {
            primary_contact_id: 1,
            emails: vec!["a@x.com".to_string()],
            phone_numbers: vec![],
            secondary_contact_ids: vec![],
        }
    );

    let stored = all_contacts(&conn);
    assert_eq!(stored.len(), 1);
    assert!(stored[0].is_primary());
}

#[test]
fn new_email_for_known_phone_creates_secondary() {
    let mut conn = open_db_in_memory().unwrap();
    identify_atomic(&mut conn, &Observation::both("a@x.com", "111")).unwrap();

    let projection = identify_atomic(&mut conn, &Observation::both("b@x.com", "111")).unwrap();
    assert_eq!(
        projection,
        ContactProjection {
            primary_contact_id: 1,
            emails: vec!["a@x.com".to_string(), "b@x.com".to_string()],
            phone_numbers: vec!["111".to_string()],
            secondary_contact_ids: vec![2],
        }
    );

    let secondary = &all_contacts(&conn)[1];
    assert_eq!(secondary.link_precedence, LinkPrecedence::Secondary);
    assert_eq!(secondary.linked_id, Some(1));
}

#[test]
fn linking_two_primaries_demotes_the_newer_one() {
    let mut conn = open_db_in_memory().unwrap();
    identify_atomic(&mut conn, &Observation::email("a@x.com")).unwrap();
    identify_atomic(&mut conn, &Observation::phone("222")).unwrap();

    let projection = identify_atomic(&mut conn, &Observation::both("a@x.com", "222")).unwrap();
    assert_eq!(projection.primary_contact_id, 1);
    assert_eq!(projection.emails, vec!["a@x.com"]);
    assert_eq!(projection.phone_numbers, vec!["222"]);
    assert_eq!(projection.secondary_contact_ids, vec![2]);

    let stored = all_contacts(&conn);
    assert_eq!(stored.len(), 2, "merge must not create a contact");
    assert_eq!(stored[1].link_precedence, LinkPrecedence::Secondary);
    assert_eq!(stored[1].linked_id, Some(1));
    assert_single_primary_per_cluster(&stored);
}

#[test]
fn oldest_primary_wins_even_with_larger_id() {
    let mut conn = open_db_in_memory().unwrap();
    identify_atomic(&mut conn, &Observation::email("young@x.com")).unwrap();
    identify_atomic(&mut conn, &Observation::phone("999")).unwrap();
    conn.execute("UPDATE contacts SET created_at = 1 WHERE id = 2;", [])
        .unwrap();

    let projection =
        identify_atomic(&mut conn, &Observation::both("young@x.com", "999")).unwrap();
    assert_eq!(projection.primary_contact_id, 2);
    assert_eq!(projection.secondary_contact_ids, vec![1]);
    assert_eq!(projection.emails, vec!["young@x.com"]);
}

#[test]
fn repeated_observation_is_idempotent() {
    let mut conn = open_db_in_memory().unwrap();
    identify_atomic(&mut conn, &Observation::both("a@x.com", "111")).unwrap();
    let observation = Observation::both("b@x.com", "111");

    let first = identify_atomic(&mut conn, &observation).unwrap();
    let before = all_contacts(&conn);
    let second = identify_atomic(&mut conn, &observation).unwrap();
    let after = all_contacts(&conn);

    assert_eq!(first, second);
    assert_eq!(before, after);
}

#[test]
fn subset_observations_return_cluster_without_writes() {
    let mut conn = open_db_in_memory().unwrap();
    identify_atomic(&mut conn, &Observation::both("a@x.com", "111")).unwrap();
    identify_atomic(&mut conn, &Observation::both("b@x.com", "111")).unwrap();
    let before = all_contacts(&conn);

    for observation in [
        Observation::email("b@x.com"),
        Observation::phone("111"),
        Observation::both("a@x.com", "111"),
    ] {
        let projection = identify_atomic(&mut conn, &observation).unwrap();
        assert_eq!(projection.primary_contact_id, 1);
        assert_eq!(projection.emails, vec!["a@x.com", "b@x.com"]);
        assert_eq!(projection.secondary_contact_ids, vec![2]);
    }

    assert_eq!(all_contacts(&conn), before);
}

#[test]
fn merging_multi_member_clusters_keeps_links_single_hop() {
    let mut conn = open_db_in_memory().unwrap();
    identify_atomic(&mut conn, &Observation::both("a@x.com", "111")).unwrap();
    identify_atomic(&mut conn, &Observation::both("b@x.com", "222")).unwrap();
    identify_atomic(&mut conn, &Observation::both("c@x.com", "222")).unwrap();

    let projection = identify_atomic(&mut conn, &Observation::both("a@x.com", "222")).unwrap();
    assert_eq!(projection.primary_contact_id, 1);
    assert_eq!(projection.secondary_contact_ids, vec![2, 3]);
    assert_eq!(projection.emails, vec!["a@x.com", "b@x.com", "c@x.com"]);
    assert_eq!(projection.phone_numbers, vec!["111", "222"]);

    let stored = all_contacts(&conn);
    assert_eq!(stored.len(), 3);
    assert!(stored[1..]
        .iter()
        .all(|contact| contact.linked_id == Some(1)));
    assert_single_primary_per_cluster(&stored);

    let follow_up = identify_atomic(&mut conn, &Observation::email("c@x.com")).unwrap();
    assert_eq!(follow_up, projection);
}

#[test]
fn projection_is_union_of_all_active_members() {
    let mut conn = open_db_in_memory().unwrap();
    let observations = [
        Observation::both("a@x.com", "111"),
        Observation::both("b@x.com", "111"),
        Observation::both("b@x.com", "333"),
        Observation::phone("444"),
        Observation::both("d@x.com", "444"),
        Observation::both("d@x.com", "333"),
    ];
    let mut last = ContactProjection::default();
    for observation in &observations {
        last = identify_atomic(&mut conn, observation).unwrap();
    }

    let stored = all_contacts(&conn);
    assert_single_primary_per_cluster(&stored);
    let emails = stored
        .iter()
        .filter_map(|contact| contact.email.clone())
        .collect::<BTreeSet<_>>();
    let phones = stored
        .iter()
        .filter_map(|contact| contact.phone_number.clone())
        .collect::<BTreeSet<_>>();

    assert_eq!(last.primary_contact_id, 1);
    assert_eq!(last.emails[0], "a@x.com");
    assert_eq!(last.phone_numbers[0], "111");
    assert_eq!(last.emails.iter().cloned().collect::<BTreeSet<_>>(), emails);
    assert_eq!(
        last.phone_numbers.iter().cloned().collect::<BTreeSet<_>>(),
        phones
    );
    assert_eq!(last.emails.len(), emails.len());
    let expected_secondaries = stored
        .iter()
        .filter(|contact| !contact.is_primary())
        .map(|contact| contact.id)
        .collect::<Vec<_>>();
    assert_eq!(last.secondary_contact_ids, expected_secondaries);
}

#[test]
fn deleted_contacts_are_not_matched() {
    let mut conn = open_db_in_memory().unwrap();
    identify_atomic(&mut conn, &Observation::email("a@x.com")).unwrap();
    SqliteContactStore::try_new(&conn)
        .unwrap()
        .soft_delete_contact(1)
        .unwrap();

    let projection = identify_atomic(&mut conn, &Observation::email("a@x.com")).unwrap();
    assert_eq!(projection.primary_contact_id, 2);
    assert!(projection.secondary_contact_ids.is_empty());
}

#[test]
fn missing_identifiers_are_rejected_without_writes() {
    let mut conn = open_db_in_memory().unwrap();

    let err = identify_atomic(&mut conn, &Observation::new(Some(String::new()), None))
        .unwrap_err();
    assert!(matches!(err, IdentifyError::InvalidInput));
    let err = identify_atomic(&mut conn, &Observation::default()).unwrap_err();
    assert!(matches!(err, IdentifyError::InvalidInput));
    assert!(all_contacts(&conn).is_empty());
}

#[test]
fn whitespace_identifier_is_matched_literally() {
    let mut conn = open_db_in_memory().unwrap();

    let first = identify_atomic(&mut conn, &Observation::email(" ")).unwrap();
    assert_eq!(first.primary_contact_id, 1);
    assert_eq!(first.emails, vec![" "]);

    let again = identify_atomic(&mut conn, &Observation::email(" ")).unwrap();
    assert_eq!(again, first);

    let other = identify_atomic(&mut conn, &Observation::email("  ")).unwrap();
    assert_eq!(other.primary_contact_id, 2);
    assert_eq!(all_contacts(&conn).len(), 2);
}

#[test]
fn tombstoned_primary_strands_its_secondaries() {
    let mut conn = open_db_in_memory().unwrap();
    identify_atomic(&mut conn, &Observation::both("a@x.com", "111")).unwrap();
    identify_atomic(&mut conn, &Observation::both("b@x.com", "111")).unwrap();
    SqliteContactStore::try_new(&conn)
        .unwrap()
        .soft_delete_contact(1)
        .unwrap();
    let before = all_contacts(&conn);

    let err = identify_atomic(&mut conn, &Observation::email("b@x.com")).unwrap_err();
    assert!(matches!(err, IdentifyError::Infrastructure(_)));
    assert!(err.to_string().contains("no primary"));
    assert_eq!(all_contacts(&conn), before);
}

#[test]
fn concurrent_identifies_on_one_file_share_a_single_primary() {
    const WORKERS: usize = 8;
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("contacts.sqlite3");
    drop(open_db(&db_path).unwrap());

    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles = (0..WORKERS)
        .map(|_| {
            let db_path = db_path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut conn = open_db(&db_path).unwrap();
                barrier.wait();
                identify_atomic(&mut conn, &Observation::both("race@x.com", "999")).unwrap()
            })
        })
        .collect::<Vec<_>>();
    let projections = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect::<Vec<_>>();

    let first = &projections[0];
    assert!(projections
        .iter()
        .all(|projection| projection.primary_contact_id == first.primary_contact_id));
    assert!(projections.iter().all(|projection| projection
        .secondary_contact_ids
        .is_empty()));

    let conn = open_db(&db_path).unwrap();
    let contacts = all_contacts(&conn);
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].link_precedence, LinkPrecedence::Primary);
    assert_eq!(contacts[0].id, first.primary_contact_id);
}

#[test]
fn failed_relink_rolls_back_demotion() {
    let mut conn = open_db_in_memory().unwrap();
    identify_atomic(&mut conn, &Observation::both("a@x.com", "111")).unwrap();
    identify_atomic(&mut conn, &Observation::both("b@x.com", "222")).unwrap();
    identify_atomic(&mut conn, &Observation::both("c@x.com", "222")).unwrap();
    conn.execute_batch(
        "CREATE TRIGGER block_relink BEFORE UPDATE ON contacts
         WHEN OLD.id = 3
         BEGIN SELECT RAISE(ABORT, 'update blocked'); END;",
    )
    .unwrap();
    let before = all_contacts(&conn);

    let err = identify_atomic(&mut conn, &Observation::both("a@x.com", "222")).unwrap_err();
    assert!(matches!(err, IdentifyError::Infrastructure(_)));
    assert_eq!(all_contacts(&conn), before);
    assert!(all_contacts(&conn)[1].is_primary());
}

#[test]
fn failed_insert_leaves_store_untouched() {
    let mut conn = open_db_in_memory().unwrap();
    identify_atomic(&mut conn, &Observation::both("a@x.com", "111")).unwrap();
    conn.execute_batch(
        "CREATE TRIGGER block_insert BEFORE INSERT ON contacts
         BEGIN SELECT RAISE(ABORT, 'insert blocked'); END;",
    )
    .unwrap();

    let err = identify_atomic(&mut conn, &Observation::both("b@x.com", "111")).unwrap_err();
    assert!(matches!(err, IdentifyError::Infrastructure(_)));
    assert_eq!(all_contacts(&conn).len(), 1);
}

#[test]
fn service_over_memory_store_matches_sqlite_behaviour() {
    let store = MemoryContactStore::new();
    let service = IdentifyService::new(&store);

    service.identify(&Observation::email("a@x.com")).unwrap();
    service.identify(&Observation::phone("222")).unwrap();
    let merged = service
        .identify(&Observation::both("a@x.com", "222"))
        .unwrap();
    assert_eq!(merged.primary_contact_id, 1);
    assert_eq!(merged.secondary_contact_ids, vec![2]);

    let view = service.cluster_of(2).unwrap();
    assert_eq!(view, merged);
    assert!(matches!(
        service.cluster_of(99),
        Err(IdentifyError::ContactNotFound(99))
    ));
    assert_eq!(store.all()[1].linked_id, Some(1));
}
