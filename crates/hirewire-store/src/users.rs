//! The two user collections: job seekers and employers.
//!
//! Messaging never writes these in production (profiles are owned by the
//! account service); the upserts exist for seeding and tests.

use rusqlite::{params, OptionalExtension};

use hirewire_shared::{UserId, UserIdentity, UserKind};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Contact, Employer, JobSeeker};

impl Database {
    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    pub fn upsert_jobseeker(&self, seeker: &JobSeeker) -> Result<()> {
        self.conn().execute(
            "INSERT INTO jobseekers (id, name, email, job_preference, skills, experience, test_completed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                job_preference = excluded.job_preference,
                skills = excluded.skills,
                experience = excluded.experience,
                test_completed = excluded.test_completed",
            params![
                seeker.id.as_str(),
                seeker.name,
                seeker.email,
                seeker.job_preference,
                serde_json::to_string(&seeker.skills)?,
                seeker.experience,
                seeker.test_completed,
            ],
        )?;
        Ok(())
    }

    pub fn upsert_employer(&self, employer: &Employer) -> Result<()> {
        self.conn().execute(
            "INSERT INTO employers (id, name, email, industry, description)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                industry = excluded.industry,
                description = excluded.description",
            params![
                employer.id.as_str(),
                employer.name,
                employer.email,
                employer.industry,
                employer.description,
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Resolve a user in either collection with a single query. Job seekers
    /// win if an id somehow exists in both. `None` means unknown user.
    pub fn lookup_user(&self, id: &UserId) -> Result<Option<UserIdentity>> {
        let row = self
            .conn()
            .query_row(
                "SELECT kind, name FROM (
                    SELECT 'Jobseeker' AS kind, name, 0 AS rank FROM jobseekers WHERE id = ?1
                    UNION ALL
                    SELECT 'Employeer' AS kind, name, 1 AS rank FROM employers WHERE id = ?1
                 )
                 ORDER BY rank ASC
                 LIMIT 1",
                params![id.as_str()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        row.map(|(kind, name)| {
            let kind = UserKind::parse(&kind).ok_or(StoreError::UnknownUserKind(kind))?;
            Ok(UserIdentity {
                id: id.clone(),
                kind,
                display_name: name,
            })
        })
        .transpose()
    }

    /// Users `requester` may open a conversation with: job seekers see every
    /// employer; employers see job seekers who completed the assessment.
    pub fn list_connectable_users(
        &self,
        requester: &UserId,
        requester_kind: UserKind,
    ) -> Result<Vec<Contact>> {
        match requester_kind {
            UserKind::Jobseeker => {
                let mut stmt = self.conn().prepare(
                    "SELECT id, name, email, industry, description
                     FROM employers
                     WHERE id != ?1
                     ORDER BY name ASC",
                )?;
                let rows = stmt.query_map(params![requester.as_str()], row_to_employer)?;
                let mut contacts = Vec::new();
                for row in rows {
                    contacts.push(Contact::Employer(row?));
                }
                Ok(contacts)
            }
            UserKind::Employer => {
                let mut stmt = self.conn().prepare(
                    "SELECT id, name, email, job_preference, skills, experience, test_completed
                     FROM jobseekers
                     WHERE id != ?1 AND test_completed = 1
                     ORDER BY name ASC",
                )?;
                let rows = stmt.query_map(params![requester.as_str()], row_to_jobseeker)?;
                let mut contacts = Vec::new();
                for row in rows {
                    contacts.push(Contact::Jobseeker(row?));
                }
                Ok(contacts)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_jobseeker(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobSeeker> {
    let skills_json: String = row.get(4)?;
    let skills: Vec<String> = serde_json::from_str(&skills_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(JobSeeker {
        id: UserId(row.get(0)?),
        name: row.get(1)?,
        email: row.get(2)?,
        job_preference: row.get(3)?,
        skills,
        experience: row.get(5)?,
        test_completed: row.get(6)?,
    })
}

fn row_to_employer(row: &rusqlite::Row<'_>) -> rusqlite::Result<Employer> {
    Ok(Employer {
        id: UserId(row.get(0)?),
        name: row.get(1)?,
        email: row.get(2)?,
        industry: row.get(3)?,
        description: row.get(4)?,
    })
}
