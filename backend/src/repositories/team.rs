use sqlx::PgPool;

use crate::models::team::Team;
use crate::types::{TeamId, UserId};

pub async fn find_by_id(pool: &PgPool, team_id: TeamId) -> Result<Option<Team>, sqlx::Error> {
    sqlx::query_as::<_, Team>(
        "SELECT id, company_id, owner_user_id, name FROM teams WHERE id = $1",
    )
    .bind(team_id)
    .fetch_optional(pool)
    .await
}

/// Every member of the team, for presence snapshot narrowing.
pub async fn member_ids(pool: &PgPool, team_id: TeamId) -> Result<Vec<UserId>, sqlx::Error> {
    sqlx::query_scalar::<_, UserId>("SELECT user_id FROM team_members WHERE team_id = $1")
        .bind(team_id)
        .fetch_all(pool)
        .await
}

/// Whether `leader_id` leads any team `member_id` belongs to: team owner, or
/// an owner/admin membership row in a shared team.
pub async fn leads_user(
    pool: &PgPool,
    leader_id: UserId,
    member_id: UserId,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS ( \
            SELECT 1 FROM team_members lead \
            JOIN team_members member ON member.team_id = lead.team_id \
            WHERE lead.user_id = $1 \
              AND lead.role_in_team IN ('owner', 'admin') \
              AND member.user_id = $2 \
         ) OR EXISTS ( \
            SELECT 1 FROM teams t \
            JOIN team_members member ON member.team_id = t.id \
            WHERE t.owner_user_id = $1 AND member.user_id = $2 \
         )",
    )
    .bind(leader_id)
    .bind(member_id)
    .fetch_one(pool)
    .await
}

/// All user ids in teams led by `leader_id`; feeds team-scoped presence
/// snapshots.
pub async fn led_member_ids(pool: &PgPool, leader_id: UserId) -> Result<Vec<UserId>, sqlx::Error> {
    sqlx::query_scalar::<_, UserId>(
        "SELECT DISTINCT member.user_id \
         FROM team_members member \
         WHERE member.team_id IN ( \
            SELECT lead.team_id FROM team_members lead \
            WHERE lead.user_id = $1 AND lead.role_in_team IN ('owner', 'admin') \
            UNION \
            SELECT t.id FROM teams t WHERE t.owner_user_id = $1 \
         )",
    )
    .bind(leader_id)
    .fetch_all(pool)
    .await
}
