//! Identity component flow: issuing, verifying, and revoking token pairs
//! against the in-process KV.

use std::sync::Arc;
use std::time::Duration;

use tempo_backend::models::user::{User, UserRole};
use tempo_backend::services::kv::MemoryKv;
use tempo_backend::services::revocation::RevocationService;
use tempo_backend::types::CompanyId;
use tempo_backend::utils::jwt::{issue_pair, verify_token, TokenKind};

const KEY: &str = "integration-test-signing-key-0123456789";

fn fixture_user() -> User {
    User::new(
        Some(CompanyId::new()),
        "worker@example.com".into(),
        "hash".into(),
        "Worker".into(),
        UserRole::RegularUser,
    )
}

#[tokio::test]
async fn rotation_rejects_the_superseded_refresh_token() {
    let revocation = RevocationService::new(Arc::new(MemoryKv::new()));
    let user = fixture_user();

    let first = issue_pair(&user, KEY, 900, 604_800).expect("issue first pair");
    let first_claims =
        verify_token(&first.refresh, KEY, TokenKind::Refresh).expect("fresh refresh verifies");

    // Rotation: tombstone the old jti for its remaining lifetime, then issue
    // the replacement pair.
    revocation
        .revoke(
            &first_claims.jti,
            Duration::from_secs(first_claims.remaining_ttl()),
        )
        .await
        .unwrap();
    let second = issue_pair(&user, KEY, 900, 604_800).expect("issue second pair");

    // The old refresh still has a valid signature, but the revocation set
    // rejects it; the new one passes both checks.
    let replayed = verify_token(&first.refresh, KEY, TokenKind::Refresh).expect("signature holds");
    assert!(revocation.is_revoked(&replayed.jti).await.unwrap());

    let fresh = verify_token(&second.refresh, KEY, TokenKind::Refresh).expect("new refresh");
    assert!(!revocation.is_revoked(&fresh.jti).await.unwrap());
}

#[tokio::test]
async fn access_and_refresh_tokens_are_not_interchangeable() {
    let user = fixture_user();
    let pair = issue_pair(&user, KEY, 900, 604_800).expect("issue pair");

    assert!(verify_token(&pair.access, KEY, TokenKind::Refresh).is_err());
    assert!(verify_token(&pair.refresh, KEY, TokenKind::Access).is_err());
}

#[tokio::test]
async fn claims_carry_tenancy_and_authority() {
    let user = fixture_user();
    let pair = issue_pair(&user, KEY, 900, 604_800).expect("issue pair");

    let claims = verify_token(&pair.access, KEY, TokenKind::Access).unwrap();
    assert_eq!(claims.sub, user.id);
    assert_eq!(claims.company_id, user.company_id);
    assert_eq!(claims.role, UserRole::RegularUser);
    assert!(claims.remaining_ttl() > 0 && claims.remaining_ttl() <= 900);
}

#[tokio::test]
async fn each_pair_gets_distinct_jtis() {
    let user = fixture_user();
    let a = issue_pair(&user, KEY, 900, 604_800).unwrap();
    let b = issue_pair(&user, KEY, 900, 604_800).unwrap();

    let jtis = [
        a.access_claims.jti,
        a.refresh_claims.jti,
        b.access_claims.jti,
        b.refresh_claims.jti,
    ];
    let unique: std::collections::HashSet<&String> = jtis.iter().collect();
    assert_eq!(unique.len(), jtis.len());
}
