//! Contact store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide the narrow lookup/write surface identity resolution depends on.
//! - Keep SQL details inside the core persistence boundary.
//!
//! # Invariants
//! - Lookups never return tombstoned contacts.
//! - Write paths validate records before SQL mutations.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::{now_epoch_ms, DbError};
use crate::model::contact::{
    Contact, ContactId, ContactValidationError, LinkPrecedence, NewContact,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

const CONTACT_SELECT_SQL: &str = "SELECT
    id,
    email,
    phone_number,
    link_precedence,
    linked_id,
    created_at,
    updated_at,
    deleted_at
FROM contacts";

pub type RepoResult<T> = Result<T, RepoError>;

/// Generic repository error for contact persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(ContactValidationError),
    Db(DbError),
    NotFound(ContactId),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "contact not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted contact data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::NotFound(_) => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<ContactValidationError> for RepoError {
    fn from(value: ContactValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Read-only half of the contact store used by identity resolution.
pub trait MatchLookup {
    /// Non-deleted contacts whose email equals `email` or whose phone number
    /// equals `phone_number`. Absent arguments contribute no predicate.
    ///
    /// Results are ordered by `created_at ASC, id ASC`.
    fn find_by_identifier(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> RepoResult<Vec<Contact>>;

    /// Non-deleted contacts whose id or `linked_id` is in `anchors`.
    ///
    /// Results are ordered by `created_at ASC, id ASC`.
    fn find_by_cluster_anchors(&self, anchors: &BTreeSet<ContactId>) -> RepoResult<Vec<Contact>>;
}

/// Full contact store surface: lookups plus the writes resolution may plan.
pub trait ContactStore: MatchLookup {
    /// Persists a new contact; the store assigns id and timestamps.
    fn create(&self, fields: &NewContact) -> RepoResult<Contact>;

    /// Sets precedence and link on every listed non-deleted contact and bumps
    /// `updated_at`. Returns the number of rows changed.
    fn update_many(
        &self,
        ids: &[ContactId],
        precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> RepoResult<usize>;

    /// Gets one contact by id with optional tombstone visibility.
    fn get_contact(&self, id: ContactId, include_deleted: bool) -> RepoResult<Option<Contact>>;

    /// Tombstones a contact. Repeated calls keep the first timestamp.
    ///
    /// Secondaries keep their link. Tombstoning a primary that still has live
    /// secondaries leaves their cluster without a primary; later resolutions
    /// touching it fail with [`RepoError::InvalidData`] until the data is
    /// repaired.
    fn soft_delete_contact(&self, id: ContactId) -> RepoResult<()>;
}

impl<T: MatchLookup + ?Sized> MatchLookup for &T {
    fn find_by_identifier(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> RepoResult<Vec<Contact>> {
        (**self).find_by_identifier(email, phone_number)
    }

    fn find_by_cluster_anchors(&self, anchors: &BTreeSet<ContactId>) -> RepoResult<Vec<Contact>> {
        (**self).find_by_cluster_anchors(anchors)
    }
}

impl<T: ContactStore + ?Sized> ContactStore for &T {
    fn create(&self, fields: &NewContact) -> RepoResult<Contact> {
        (**self).create(fields)
    }

    fn update_many(
        &self,
        ids: &[ContactId],
        precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> RepoResult<usize> {
        (**self).update_many(ids, precedence, linked_id)
    }

    fn get_contact(&self, id: ContactId, include_deleted: bool) -> RepoResult<Option<Contact>> {
        (**self).get_contact(id, include_deleted)
    }

    fn soft_delete_contact(&self, id: ContactId) -> RepoResult<()> {
        (**self).soft_delete_contact(id)
    }
}

/// SQLite-backed contact store.
///
/// Accepts any connection, including an open `Transaction` through deref,
/// so callers decide the atomicity scope.
pub struct SqliteContactStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteContactStore<'conn> {
    /// Constructs a store from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_contacts_table(conn)?;
        Ok(Self { conn })
    }

    fn query_contacts(&self, sql: &str, bind_values: Vec<Value>) -> RepoResult<Vec<Contact>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut contacts = Vec::new();

        while let Some(row) = rows.next()? {
            contacts.push(parse_contact_row(row)?);
        }

        Ok(contacts)
    }
}

impl MatchLookup for SqliteContactStore<'_> {
    fn find_by_identifier(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> RepoResult<Vec<Contact>> {
        let mut predicates = Vec::new();
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(email) = email {
            predicates.push("email = ?");
            bind_values.push(Value::Text(email.to_string()));
        }
        if let Some(phone_number) = phone_number {
            predicates.push("phone_number = ?");
            bind_values.push(Value::Text(phone_number.to_string()));
        }
        if predicates.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "{CONTACT_SELECT_SQL}
             WHERE deleted_at IS NULL
               AND ({})
             ORDER BY created_at ASC, id ASC;",
            predicates.join(" OR ")
        );
        self.query_contacts(&sql, bind_values)
    }

    fn find_by_cluster_anchors(&self, anchors: &BTreeSet<ContactId>) -> RepoResult<Vec<Contact>> {
        if anchors.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; anchors.len()].join(", ");
        let sql = format!(
            "{CONTACT_SELECT_SQL}
             WHERE deleted_at IS NULL
               AND (id IN ({placeholders}) OR linked_id IN ({placeholders}))
             ORDER BY created_at ASC, id ASC;"
        );
        let bind_values = anchors
            .iter()
            .chain(anchors.iter())
            .map(|id| Value::Integer(*id))
            .collect();
        self.query_contacts(&sql, bind_values)
    }
}

impl ContactStore for SqliteContactStore<'_> {
    fn create(&self, fields: &NewContact) -> RepoResult<Contact> {
        fields.validate()?;
        let now = now_epoch_ms();

        self.conn.execute(
            "INSERT INTO contacts (
                email,
                phone_number,
                link_precedence,
                linked_id,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?5);",
            params![
                fields.email.as_deref(),
                fields.phone_number.as_deref(),
                fields.link_precedence.as_str(),
                fields.linked_id,
                now,
            ],
        )?;

        let contact = Contact {
            id: self.conn.last_insert_rowid(),
            email: fields.email.clone(),
            phone_number: fields.phone_number.clone(),
            link_precedence: fields.link_precedence,
            linked_id: fields.linked_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        contact.validate()?;
        Ok(contact)
    }

    fn update_many(
        &self,
        ids: &[ContactId],
        precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> RepoResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        if let Some(target) = linked_id {
            if ids.contains(&target) {
                return Err(ContactValidationError::SelfLink(target).into());
            }
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "UPDATE contacts
             SET
                link_precedence = ?,
                linked_id = ?,
                updated_at = ?
             WHERE deleted_at IS NULL
               AND id IN ({placeholders});"
        );
        let mut bind_values = vec![
            Value::Text(precedence.as_str().to_string()),
            linked_id.map_or(Value::Null, Value::Integer),
            Value::Integer(now_epoch_ms()),
        ];
        bind_values.extend(ids.iter().map(|id| Value::Integer(*id)));

        let changed = self.conn.execute(&sql, params_from_iter(bind_values))?;
        Ok(changed)
    }

    fn get_contact(&self, id: ContactId, include_deleted: bool) -> RepoResult<Option<Contact>> {
        let mut stmt = self.conn.prepare(&format!(
            "{CONTACT_SELECT_SQL}
             WHERE id = ?1
               AND (?2 = 1 OR deleted_at IS NULL);"
        ))?;

        let mut rows = stmt.query(params![id, i64::from(include_deleted)])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_contact_row(row)?));
        }

        Ok(None)
    }

    fn soft_delete_contact(&self, id: ContactId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE contacts
             SET
                deleted_at = COALESCE(deleted_at, ?2),
                updated_at = ?2
             WHERE id = ?1;",
            params![id, now_epoch_ms()],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }

        Ok(())
    }
}

fn ensure_contacts_table(conn: &Connection) -> RepoResult<()> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'contacts';",
            [],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;

    if exists.is_none() {
        return Err(RepoError::InvalidData(
            "contacts table is missing; open the database through db::open_db".to_string(),
        ));
    }

    Ok(())
}

fn parse_contact_row(row: &Row<'_>) -> RepoResult<Contact> {
    let precedence_text: String = row.get("link_precedence")?;
    let link_precedence = LinkPrecedence::parse(&precedence_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid link precedence `{precedence_text}` in contacts.link_precedence"
        ))
    })?;

    let contact = Contact {
        id: row.get("id")?,
        email: row.get("email")?,
        phone_number: row.get("phone_number")?,
        link_precedence,
        linked_id: row.get("linked_id")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        deleted_at: row.get("deleted_at")?,
    };
    contact.validate()?;
    Ok(contact)
}
