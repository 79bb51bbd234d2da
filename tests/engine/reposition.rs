use pagetree::{Error, Grantee, Level, PageId, Reposition};
use uuid::Uuid;

use super::fixture::{Fixture, by_grantee, sources};

/// Root → Child → NestedChild, with a user grant made on Child.
struct Chain {
    root: PageId,
    root_default: pagetree::PermissionId,
    child: PageId,
    child_grant: pagetree::Permission,
    nested: PageId,
    user: Uuid,
}

async fn chain(fx: &Fixture) -> Chain {
    let root = fx.bare_root("Root").await;
    let child = fx.child(root.page.id, "Child").await;
    let nested = fx.child(child.page.id, "NestedChild").await;
    let user = fx.member().await;
    let child_grant = fx.grant(child.page.id, Grantee::User(user), Level::View).await;

    Chain {
        root: root.page.id,
        root_default: root.permissions[0].id,
        child: child.page.id,
        child_grant,
        nested: nested.page.id,
        user,
    }
}

#[tokio::test]
async fn moving_out_of_a_branch_drops_inheritance_from_it() {
    let fx = Fixture::new().await;
    let c = chain(&fx).await;

    let before = fx.permissions(c.nested).await;
    assert_eq!(by_grantee(&before, Grantee::User(c.user)).inherited_from(), Some(c.child_grant.id));

    fx.move_to(c.nested, Some(c.root)).await;

    let after = fx.permissions(c.nested).await;
    assert_eq!(after.len(), 2);
    assert!(after.iter().all(|p| p.inherited_from() != Some(c.child_grant.id)));
    assert_eq!(fx.page(c.nested).await.parent_id, Some(c.root));
    fx.assert_consistent(&[c.root, c.child, c.nested]).await;
}

#[tokio::test]
async fn former_inheritance_becomes_local_and_cascades() {
    let fx = Fixture::new().await;
    let c = chain(&fx).await;
    let super_nested = fx.child(c.nested, "SuperNestedChild").await.page.id;

    let moved = fx.move_to(c.nested, Some(c.root)).await;

    let nested = fx.permissions(c.nested).await;
    assert_eq!(nested.len(), 2);
    let space = by_grantee(&nested, Grantee::Space(fx.space.id));
    assert_eq!(space.inherited_from(), Some(c.root_default));
    let local = by_grantee(&nested, Grantee::User(c.user));
    assert!(local.is_source());
    assert_eq!(local.level, Level::View);

    let deeper = fx.permissions(super_nested).await;
    assert_eq!(deeper.len(), 2);
    assert_eq!(
        by_grantee(&deeper, Grantee::User(c.user)).inherited_from(),
        Some(local.id)
    );
    assert_eq!(
        by_grantee(&deeper, Grantee::Space(fx.space.id)).inherited_from(),
        Some(c.root_default)
    );

    assert_eq!(moved.touched, vec![c.nested, super_nested]);
    assert_eq!(moved.permissions.len(), 2);
    fx.assert_consistent(&[c.nested, super_nested]).await;
}

#[tokio::test]
async fn moving_to_another_root_keeps_same_level_grants_inherited() {
    let fx = Fixture::new().await;
    let old_root = fx.root("Old root").await;
    let role = Uuid::new_v4();
    {
        use pagetree::Store;
        fx.conn().insert_role(role, fx.space.id, "Readers").await.unwrap();
    }
    fx.grant(old_root.page.id, Grantee::Role(role), Level::View).await;
    let new_root = fx.root("New root").await;
    let child = fx.child(old_root.page.id, "Child").await.page.id;

    fx.move_to(child, Some(new_root.page.id)).await;

    let after = fx.permissions(child).await;
    assert_eq!(after.len(), 3);
    let role_grant = by_grantee(&after, Grantee::Role(role));
    assert!(role_grant.is_source());

    let old_ids: Vec<_> = fx.permissions(old_root.page.id).await.iter().map(|p| p.id).collect();
    assert!(
        after
            .iter()
            .filter_map(|p| p.inherited_from())
            .all(|from| !old_ids.contains(&from))
    );
    // Space default and creator access are granted at the same level by the new root.
    let new_ids: Vec<_> = new_root.permissions.iter().map(|p| p.id).collect();
    for grantee in [Grantee::Space(fx.space.id), Grantee::User(fx.user)] {
        let from = by_grantee(&after, grantee).inherited_from().unwrap();
        assert!(new_ids.contains(&from));
    }
    fx.assert_consistent(&[child]).await;
}

#[tokio::test]
async fn different_level_grant_is_kept_locally_for_the_whole_subtree() {
    let fx = Fixture::new().await;
    let old_root = fx.root("Old root").await;
    // Lower the creator's access on the old tree only.
    fx.grant(old_root.page.id, Grantee::User(fx.user), Level::View).await;
    let new_root = fx.root("New root").await;
    let child = fx.child(old_root.page.id, "Child").await.page.id;
    let nested = fx.child(child, "Nested").await.page.id;

    fx.move_to(child, Some(new_root.page.id)).await;

    let child_perms = fx.permissions(child).await;
    let nested_perms = fx.permissions(nested).await;
    assert_eq!(child_perms.len(), 2);
    assert_eq!(nested_perms.len(), 2);

    let kept = by_grantee(&child_perms, Grantee::User(fx.user));
    assert!(kept.is_source());
    assert_eq!(kept.level, Level::View);
    assert_eq!(
        by_grantee(&nested_perms, Grantee::User(fx.user)).inherited_from(),
        Some(kept.id)
    );

    let old_default = old_root.permissions[0].id;
    assert!(nested_perms.iter().all(|p| p.inherited_from() != Some(old_default)));
    fx.assert_consistent(&[child, nested]).await;
}

#[tokio::test]
async fn moving_out_and_back_leaves_no_phantom_inheritance() {
    let fx = Fixture::new().await;
    let root = fx.bare_root("Root").await.page.id;
    let c1 = fx.child(root, "C1").await.page.id;
    let n = fx.child(c1, "N").await.page.id;
    let s = fx.child(n, "S").await.page.id;
    let user = fx.member().await;
    fx.grant(n, Grantee::User(user), Level::View).await;

    fx.move_to(c1, None).await;
    fx.move_to(c1, Some(root)).await;

    let n_perms = fx.permissions(n).await;
    assert_eq!(n_perms.len(), 2);
    assert!(by_grantee(&n_perms, Grantee::User(user)).is_source());
    assert_eq!(fx.page(c1).await.parent_id, Some(root));
    fx.assert_consistent(&[root, c1, n, s]).await;
}

#[tokio::test]
async fn source_permissions_survive_every_move() {
    let fx = Fixture::new().await;
    let a = fx.root("A").await.page.id;
    let b = fx.root("B").await.page.id;
    let page = fx.child(a, "Page").await.page.id;
    fx.grant(page, Grantee::Public, Level::View).await;
    fx.grant(page, Grantee::Space(fx.space.id), Level::ViewComment).await;
    let before = sources(&fx.permissions(page).await);
    assert_eq!(before.len(), 2);

    fx.move_to(page, Some(b)).await;
    fx.move_to(page, None).await;
    fx.move_to(page, Some(a)).await;

    let after = fx.permissions(page).await;
    for source in &before {
        assert!(after.contains(source), "source {} changed", source.id);
    }
    fx.assert_consistent(&[page]).await;
}

#[tokio::test]
async fn nearest_ancestor_source_wins() {
    let fx = Fixture::new().await;
    let root = fx.root("Root").await.page.id;
    let upper = fx.child(root, "Upper").await.page.id;
    let lower = fx.child(upper, "Lower").await.page.id;
    let page = fx.child(root, "Page").await.page.id;
    let near = fx.grant(upper, Grantee::Public, Level::ViewComment).await;
    fx.grant(root, Grantee::Public, Level::View).await;

    fx.move_to(page, Some(lower)).await;

    let public = by_grantee(&fx.permissions(page).await, Grantee::Public).clone();
    assert_eq!(public.inherited_from(), Some(near.id));
    assert_eq!(public.level, Level::ViewComment);
    fx.assert_consistent(&[root, upper, lower, page]).await;
}

#[tokio::test]
async fn whole_subtree_is_recomputed() {
    let fx = Fixture::new().await;
    let old_root = fx.bare_root("Old").await.page.id;
    let new_root = fx.bare_root("New").await.page.id;
    let top = fx.child(old_root, "Top").await.page.id;
    let mut pages = vec![top];
    for depth in 0..4 {
        let parent = pages[depth];
        let left = fx.child(parent, "Left").await.page.id;
        fx.child(parent, "Right").await;
        pages.push(left);
    }
    fx.grant(old_root, Grantee::Public, Level::Editor).await;
    let new_public = fx.grant(new_root, Grantee::Public, Level::View).await;

    let moved = fx.move_to(top, Some(new_root)).await;

    let conn = fx.conn();
    let subtree = {
        use pagetree::Store;
        let mut ids = vec![top];
        ids.extend(conn.descendants(top).await.unwrap().iter().map(|p| p.id));
        ids
    };
    assert_eq!(subtree.len(), 9);
    assert_eq!(moved.touched.len(), 9);
    for page in &subtree {
        let public = by_grantee(&fx.permissions(*page).await, Grantee::Public).clone();
        if *page == top {
            // Old-tree editor grant differs from the new tree's view grant.
            assert!(public.is_source());
            assert_eq!(public.level, Level::Editor);
        } else {
            assert_ne!(public.inherited_from(), Some(new_public.id));
        }
    }
    fx.assert_consistent(&subtree).await;
}

#[tokio::test]
async fn index_only_move_touches_nothing() {
    let fx = Fixture::new().await;
    let root = fx.root("Root").await.page.id;
    let page = fx.child(root, "Page").await.page.id;
    fx.child(page, "Nested").await;
    let before = fx.permission_rows().await;

    let moved = fx
        .service
        .reposition_page(Reposition {
            page,
            parent: Some(root),
            index: 5,
        })
        .await
        .unwrap();

    assert!(moved.touched.is_empty());
    assert_eq!(moved.page.index, 5);
    assert_eq!(fx.permission_rows().await, before);
}

#[tokio::test]
async fn repeating_a_move_is_a_no_op() {
    let fx = Fixture::new().await;
    let c = chain(&fx).await;
    let req = Reposition {
        page: c.nested,
        parent: Some(c.root),
        index: 3,
    };

    let first = fx.service.reposition_page(req).await.unwrap();
    let after_first = fx.snapshot().await;
    let second = fx.service.reposition_page(req).await.unwrap();

    assert!(!first.touched.is_empty());
    assert!(second.touched.is_empty());
    assert_eq!(fx.snapshot().await, after_first);
    assert_eq!(fx.page(c.nested).await.index, 3);
}

#[tokio::test]
async fn moving_under_itself_is_a_cycle() {
    let fx = Fixture::new().await;
    let root = fx.root("Root").await.page.id;
    let before = fx.snapshot().await;

    let err = fx
        .service
        .reposition_page(Reposition {
            page: root,
            parent: Some(root),
            index: 0,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cycle { .. }));
    assert_eq!(fx.snapshot().await, before);
}

#[tokio::test]
async fn moving_under_a_descendant_is_a_cycle() {
    let fx = Fixture::new().await;
    let c = chain(&fx).await;
    let before = fx.snapshot().await;

    let err = fx
        .service
        .reposition_page(Reposition {
            page: c.child,
            parent: Some(c.nested),
            index: 0,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cycle { page, parent } if page == c.child && parent == c.nested));
    assert_eq!(fx.snapshot().await, before);
}

#[tokio::test]
async fn missing_pages_are_not_found() {
    let fx = Fixture::new().await;
    let root = fx.root("Root").await.page.id;

    let missing_page = fx
        .service
        .reposition_page(Reposition {
            page: PageId::new(),
            parent: Some(root),
            index: 0,
        })
        .await
        .unwrap_err();
    let missing_parent = fx
        .service
        .reposition_page(Reposition {
            page: root,
            parent: Some(PageId::new()),
            index: 0,
        })
        .await
        .unwrap_err();

    assert!(matches!(missing_page, Error::NotFound(_)));
    assert!(matches!(missing_parent, Error::NotFound(_)));
}

#[tokio::test]
async fn parent_in_another_space_is_rejected() {
    let fx = Fixture::new().await;
    let page = fx.root("Here").await.page.id;
    let other_space = pagetree::Space::new(Uuid::new_v4());
    let foreign = {
        use pagetree::Store;
        let conn = fx.conn();
        conn.insert_space(&other_space).await.unwrap();
        let foreign = pagetree::Page {
            id: PageId::new(),
            space_id: other_space.id,
            parent_id: None,
            index: 0,
            title: "There".into(),
            created_by: fx.user,
        };
        conn.insert_page(&foreign).await.unwrap();
        foreign.id
    };

    let err = fx
        .service
        .reposition_page(Reposition {
            page,
            parent: Some(foreign),
            index: 0,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn failure_mid_cascade_leaves_every_row_unchanged() {
    let fx = Fixture::new().await;
    let c = chain(&fx).await;
    let super_nested = fx.child(c.nested, "SuperNestedChild").await.page.id;
    let before = fx.snapshot().await;

    for event in ["INSERT", "UPDATE"] {
        let sql = format!(
            "CREATE TRIGGER fail_{event} BEFORE {event} ON page_permissions
             WHEN NEW.page_id = '{super_nested}'
             BEGIN SELECT RAISE(ABORT, 'disk on fire'); END"
        );
        fx.conn().execute(&sql, ()).await.unwrap();
    }

    let err = fx
        .service
        .reposition_page(Reposition {
            page: c.nested,
            parent: Some(c.root),
            index: 0,
        })
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(fx.snapshot().await, before);
    assert_eq!(fx.page(c.nested).await.parent_id, Some(c.child));
}

#[tokio::test]
async fn concurrent_moves_serialize() {
    let fx = Fixture::new().await;
    let a = fx.root("A").await.page.id;
    let b = fx.root("B").await.page.id;
    let pages = [
        fx.child(a, "One").await.page.id,
        fx.child(a, "Two").await.page.id,
        fx.child(a, "Three").await.page.id,
    ];

    let moves = pages.map(|page| {
        let service = fx.service.clone();
        tokio::spawn(async move {
            service
                .reposition_page(Reposition {
                    page,
                    parent: Some(b),
                    index: 0,
                })
                .await
        })
    });
    for handle in moves {
        handle.await.unwrap().unwrap();
    }

    for page in pages {
        assert_eq!(fx.page(page).await.parent_id, Some(b));
    }
    fx.assert_consistent(&pages).await;
}
