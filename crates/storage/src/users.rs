use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use livebanner_core::{Plan, UserAccount};

use crate::{to_rfc3339, RepositoryError};

/// Repository for users and their linked Twitch/Twitter accounts.
#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

/// Twitch identity of a user, used for Helix lookups and EventSub conditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwitchAccount {
    pub twitch_user_id: String,
    pub login: String,
}

/// Twitter identity and the OAuth1 token pair that keys every Twitter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwitterAccount {
    pub twitter_user_id: Option<String>,
    pub screen_name: Option<String>,
    pub oauth_token: String,
    pub oauth_token_secret: String,
}

impl UserRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the user on the free plan unless it already exists.
    pub async fn ensure_user(&self, user_id: &str, now: DateTime<Utc>) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO users (id, plan, partner, created_at) VALUES (?, 'free', 0, ?) \
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(user_id)
        .bind(to_rfc3339(now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_plan(&self, user_id: &str, plan: Plan, partner: bool) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE users SET plan = ?, partner = ? WHERE id = ?")
            .bind(plan.as_str())
            .bind(partner)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn fetch(&self, user_id: &str) -> Result<Option<UserAccount>, RepositoryError> {
        let row = sqlx::query("SELECT id, plan, partner FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let plan: String = row.get("plan");
        let plan = plan
            .parse::<Plan>()
            .map_err(|err| RepositoryError::Decode(err.to_string()))?;
        Ok(Some(UserAccount {
            id: row.get("id"),
            plan,
            partner: row.get("partner"),
        }))
    }

    pub async fn upsert_twitch_account(
        &self,
        user_id: &str,
        account: &TwitchAccount,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO twitch_accounts (user_id, twitch_user_id, login) VALUES (?, ?, ?) \
             ON CONFLICT(user_id) DO UPDATE SET twitch_user_id = excluded.twitch_user_id, \
             login = excluded.login",
        )
        .bind(user_id)
        .bind(&account.twitch_user_id)
        .bind(&account.login)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fetch_twitch_account(&self, user_id: &str) -> Result<Option<TwitchAccount>, RepositoryError> {
        let row = sqlx::query("SELECT twitch_user_id, login FROM twitch_accounts WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| TwitchAccount {
            twitch_user_id: row.get("twitch_user_id"),
            login: row.get("login"),
        }))
    }

    /// Stores a fresh token pair; the identity columns are reset until re-verified.
    pub async fn upsert_twitter_tokens(
        &self,
        user_id: &str,
        oauth_token: &str,
        oauth_token_secret: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO twitter_accounts (user_id, oauth_token, oauth_token_secret, updated_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(user_id) DO UPDATE SET oauth_token = excluded.oauth_token, \
             oauth_token_secret = excluded.oauth_token_secret, \
             twitter_user_id = NULL, screen_name = NULL, updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(oauth_token)
        .bind(oauth_token_secret)
        .bind(to_rfc3339(now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_twitter_identity(
        &self,
        user_id: &str,
        twitter_user_id: &str,
        screen_name: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE twitter_accounts SET twitter_user_id = ?, screen_name = ? WHERE user_id = ?",
        )
        .bind(twitter_user_id)
        .bind(screen_name)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_twitter_account(&self, user_id: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM twitter_accounts WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn fetch_twitter_account(&self, user_id: &str) -> Result<Option<TwitterAccount>, RepositoryError> {
        let row = sqlx::query(
            "SELECT twitter_user_id, screen_name, oauth_token, oauth_token_secret \
             FROM twitter_accounts WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| TwitterAccount {
            twitter_user_id: row.get("twitter_user_id"),
            screen_name: row.get("screen_name"),
            oauth_token: row.get("oauth_token"),
            oauth_token_secret: row.get("oauth_token_secret"),
        }))
    }
}
