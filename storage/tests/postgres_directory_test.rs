//! PostgreSQL tenant directory against the shared testcontainer.

use std::sync::Arc;
use std::time::Duration;

use errors::TenancyError;
use storage::{CachedTenantDirectory, PostgresTenantDirectory};
use tenant_core::{CustomDomain, Subdomain, Tenant, TenantDirectory, TenantStatus};
use testing::{postgres, unique_id, unique_tenant_id};

async fn directory() -> Option<PostgresTenantDirectory> {
    let Some(fixture) = postgres().await else {
        eprintln!("Skipping PostgreSQL test: Docker not available");
        return None;
    };
    let directory = PostgresTenantDirectory::connect(fixture.url(), 4).await.unwrap();
    directory.initialize_schema().await.unwrap();
    Some(directory)
}

fn fresh_tenant() -> Tenant {
    let id = unique_tenant_id();
    let subdomain = Subdomain::parse(&unique_id("shop")).unwrap();
    Tenant::new(id, "Test Rentals", subdomain)
}

#[tokio::test]
async fn test_upsert_and_lookup_by_every_alias() {
    let Some(directory) = directory().await else {
        return;
    };
    let domain = CustomDomain::parse(&format!("{}.example.org", unique_id("rent"))).unwrap();
    let tenant = fresh_tenant().with_custom_domain(domain.clone());
    directory.upsert(tenant.clone()).await.unwrap();

    let by_id = directory.get(&tenant.id).await.unwrap().unwrap();
    assert_eq!(by_id.subdomain, tenant.subdomain);

    let upper = Subdomain::parse(&tenant.subdomain.as_str().to_uppercase()).unwrap();
    let by_sub = directory.find_by_subdomain(&upper).await.unwrap().unwrap();
    assert_eq!(by_sub.id, tenant.id);

    let by_domain = directory.find_by_custom_domain(&domain).await.unwrap().unwrap();
    assert_eq!(by_domain.id, tenant.id);
}

#[tokio::test]
async fn test_alias_claimed_by_other_tenant_is_rejected() {
    let Some(directory) = directory().await else {
        return;
    };
    let first = fresh_tenant();
    directory.upsert(first.clone()).await.unwrap();

    let squatter = Tenant::new(unique_tenant_id(), "Squatter", first.subdomain.clone());
    let err = directory.upsert(squatter).await.unwrap_err();
    match err {
        TenancyError::AmbiguousAlias {
            existing_tenant_id,
            ..
        } => assert_eq!(existing_tenant_id, first.id.as_str()),
        other => panic!("unexpected error {other:?}")
    }
}

#[tokio::test]
async fn test_status_transitions_are_persisted() {
    let Some(directory) = directory().await else {
        return;
    };
    let tenant = fresh_tenant();
    directory.upsert(tenant.clone()).await.unwrap();

    let updated = directory
        .set_status(&tenant.id, TenantStatus::Suspended)
        .await
        .unwrap();
    assert_eq!(updated.status, TenantStatus::Suspended);

    let reloaded = directory.get(&tenant.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, TenantStatus::Suspended);

    assert!(
        directory
            .set_status(&unique_tenant_id(), TenantStatus::Active)
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_cached_directory_sees_alias_change_immediately() {
    let Some(directory) = directory().await else {
        return;
    };
    let cached = CachedTenantDirectory::new(Arc::new(directory), Duration::from_secs(3600));
    let tenant = fresh_tenant();
    cached.upsert(tenant.clone()).await.unwrap();
    assert!(cached.find_by_subdomain(&tenant.subdomain).await.unwrap().is_some());

    let renamed_alias = Subdomain::parse(&unique_id("renamed")).unwrap();
    let renamed = Tenant {
        subdomain: renamed_alias.clone(),
        ..tenant.clone()
    };
    cached.upsert(renamed).await.unwrap();

    assert!(cached.find_by_subdomain(&tenant.subdomain).await.unwrap().is_none());
    assert!(cached.find_by_subdomain(&renamed_alias).await.unwrap().is_some());
}

#[tokio::test]
async fn test_custom_domain_inside_base_domain_is_rejected() {
    let Some(directory) = directory().await else {
        return;
    };
    let directory = directory.with_base_domain("example.com");
    let owner = fresh_tenant();
    directory.upsert(owner.clone()).await.unwrap();

    let shadow = CustomDomain::parse(&format!("{}.example.com", owner.subdomain)).unwrap();
    let err = directory
        .upsert(fresh_tenant().with_custom_domain(shadow.clone()))
        .await
        .unwrap_err();
    match err {
        TenancyError::AmbiguousAlias {
            existing_tenant_id, ..
        } => assert_eq!(existing_tenant_id, owner.id.as_str()),
        other => panic!("unexpected error {other:?}")
    }
    assert!(directory.find_by_custom_domain(&shadow).await.unwrap().is_none());

    let unclaimed = CustomDomain::parse(&format!("{}.example.com", unique_id("spare"))).unwrap();
    let err = directory
        .upsert(fresh_tenant().with_custom_domain(unclaimed))
        .await
        .unwrap_err();
    assert!(matches!(err, TenancyError::Validation { .. }));
}

#[tokio::test]
async fn test_racing_custom_domain_claims_name_the_winner() {
    let Some(directory) = directory().await else {
        return;
    };
    let directory = Arc::new(directory);
    let domain = CustomDomain::parse(&format!("{}.example.org", unique_id("race"))).unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let directory = directory.clone();
        let tenant = fresh_tenant().with_custom_domain(domain.clone());
        handles.push(tokio::spawn(async move {
            let id = tenant.id.clone();
            (id, directory.upsert(tenant).await)
        }));
    }

    let mut winners = Vec::new();
    let mut losers = Vec::new();
    for handle in handles {
        let (id, result) = handle.await.unwrap();
        match result {
            Ok(()) => winners.push(id),
            Err(err) => losers.push(err)
        }
    }

    assert_eq!(winners.len(), 1);
    for err in losers {
        match err {
            TenancyError::AmbiguousAlias {
                alias,
                existing_tenant_id
            } => {
                assert_eq!(alias, domain.as_str());
                assert_eq!(existing_tenant_id, winners[0].as_str());
            }
            other => panic!("unexpected error {other:?}")
        }
    }
}
