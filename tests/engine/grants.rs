use pagetree::{Error, Grant, Grantee, Level, PermissionId, Space, Store};
use uuid::Uuid;

use super::fixture::{Fixture, by_grantee};

#[tokio::test]
async fn grant_cascades_to_every_descendant() {
    let fx = Fixture::new().await;
    let root = fx.root("Root").await.page.id;
    let child = fx.child(root, "Child").await.page.id;
    let nested = fx.child(child, "Nested").await.page.id;
    let role = Uuid::new_v4();
    fx.conn().insert_role(role, fx.space.id, "Editors").await.unwrap();

    let granted = fx.grant(child, Grantee::Role(role), Level::Editor).await;

    assert!(granted.is_source());
    assert_eq!(granted.page_id, child);
    let copy = by_grantee(&fx.permissions(nested).await, Grantee::Role(role)).clone();
    assert_eq!(copy.inherited_from(), Some(granted.id));
    assert_eq!(copy.level, Level::Editor);
    assert!(
        fx.permissions(root)
            .await
            .iter()
            .all(|p| p.grantee != Grantee::Role(role))
    );
    fx.assert_consistent(&[root, child, nested]).await;
}

#[tokio::test]
async fn granting_what_the_parent_grants_restores_inheritance() {
    let fx = Fixture::new().await;
    let root = fx.root("Root").await.page.id;
    let child = fx.child(root, "Child").await.page.id;
    let nested = fx.child(child, "Nested").await.page.id;
    let root_public = fx.grant(root, Grantee::Public, Level::View).await;

    let local = fx.grant(child, Grantee::Public, Level::ViewComment).await;
    assert!(local.is_source());
    assert_eq!(
        by_grantee(&fx.permissions(nested).await, Grantee::Public).inherited_from(),
        Some(local.id)
    );

    let back = fx.grant(child, Grantee::Public, Level::View).await;

    assert_eq!(back.id, local.id, "the row is reused");
    assert_eq!(back.inherited_from(), Some(root_public.id));
    let nested_public = by_grantee(&fx.permissions(nested).await, Grantee::Public).clone();
    assert_eq!(nested_public.inherited_from(), Some(root_public.id));
    assert_eq!(nested_public.level, Level::View);
    fx.assert_consistent(&[root, child, nested]).await;
}

#[tokio::test]
async fn changing_a_source_level_updates_its_copies_in_place() {
    let fx = Fixture::new().await;
    let root = fx.root("Root").await.page.id;
    let child = fx.child(root, "Child").await.page.id;
    let reader = fx.member().await;
    let first = fx.grant(root, Grantee::User(reader), Level::View).await;
    let copy_before = by_grantee(&fx.permissions(child).await, Grantee::User(reader)).clone();

    let second = fx.grant(root, Grantee::User(reader), Level::Editor).await;

    assert_eq!(second.id, first.id);
    let copy_after = by_grantee(&fx.permissions(child).await, Grantee::User(reader)).clone();
    assert_eq!(copy_after.id, copy_before.id);
    assert_eq!(copy_after.level, Level::Editor);
}

#[tokio::test]
async fn grantee_must_belong_to_the_space() {
    let fx = Fixture::new().await;
    let root = fx.root("Root").await.page.id;
    let other = Space::new(Uuid::new_v4());
    let foreign_role = Uuid::new_v4();
    let conn = fx.conn();
    conn.insert_space(&other).await.unwrap();
    conn.insert_role(foreign_role, other.id, "Elsewhere").await.unwrap();

    for grantee in [
        Grantee::User(Uuid::new_v4()),
        Grantee::Role(foreign_role),
        Grantee::Space(other.id),
    ] {
        let err = fx
            .service
            .grant_permission(Grant {
                page: root,
                grantee,
                level: Level::View,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{grantee} was accepted");
    }
}

#[tokio::test]
async fn revoke_removes_every_copy() {
    let fx = Fixture::new().await;
    let root = fx.root("Root").await.page.id;
    let child = fx.child(root, "Child").await.page.id;
    let nested = fx.child(child, "Nested").await.page.id;
    let public = fx.grant(child, Grantee::Public, Level::View).await;

    let touched = fx.service.revoke_permission(public.id).await.unwrap();

    assert_eq!(touched, vec![child, nested]);
    for page in [child, nested] {
        assert!(fx.permissions(page).await.iter().all(|p| !p.grantee.is_public()));
    }
    fx.assert_consistent(&[root, child, nested]).await;
}

#[tokio::test]
async fn revoke_falls_back_to_a_farther_source() {
    let fx = Fixture::new().await;
    let root = fx.root("Root").await.page.id;
    let child = fx.child(root, "Child").await.page.id;
    let nested = fx.child(child, "Nested").await.page.id;
    let far = fx.grant(root, Grantee::Public, Level::View).await;
    let near = fx.grant(child, Grantee::Public, Level::Editor).await;

    fx.service.revoke_permission(near.id).await.unwrap();

    for page in [child, nested] {
        let public = by_grantee(&fx.permissions(page).await, Grantee::Public).clone();
        assert_eq!(public.inherited_from(), Some(far.id));
        assert_eq!(public.level, Level::View);
    }
    assert!(fx.conn().permission(near.id).await.unwrap().is_none());
    fx.assert_consistent(&[root, child, nested]).await;
}

#[tokio::test]
async fn inherited_permissions_are_revoked_at_their_source() {
    let fx = Fixture::new().await;
    let root = fx.root("Root").await.page.id;
    let child = fx.child(root, "Child").await;
    let before = fx.snapshot().await;

    let err = fx
        .service
        .revoke_permission(child.permissions[0].id)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(fx.snapshot().await, before);
}

#[tokio::test]
async fn root_space_default_cannot_be_revoked() {
    let fx = Fixture::new().await;
    let root = fx.root("Root").await;
    let default = by_grantee(&root.permissions, Grantee::Space(fx.space.id)).id;

    let err = fx.service.revoke_permission(default).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let missing = fx
        .service
        .revoke_permission(PermissionId::new())
        .await
        .unwrap_err();
    assert!(matches!(missing, Error::NotFound(_)));
}

#[tokio::test]
async fn revoking_a_child_space_override_reinherits_the_default() {
    let fx = Fixture::new().await;
    let root = fx.root("Root").await;
    let child = fx.child(root.page.id, "Child").await.page.id;
    let narrowed = fx
        .grant(child, Grantee::Space(fx.space.id), Level::View)
        .await;
    assert!(narrowed.is_source());

    fx.service.revoke_permission(narrowed.id).await.unwrap();

    let space = by_grantee(&fx.permissions(child).await, Grantee::Space(fx.space.id)).clone();
    let root_default = by_grantee(&root.permissions, Grantee::Space(fx.space.id)).id;
    assert_eq!(space.inherited_from(), Some(root_default));
    assert_eq!(space.level, Level::FullAccess);
}
