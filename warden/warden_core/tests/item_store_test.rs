use warden_core::types::{Item, ItemFlags, ItemStore, ItemType};

#[test]
fn test_context_promotion_flow() {
    // An agent hands back context; only extractable items reach the token.
    let mut context = ItemStore::new();
    context.set_string("username", "alice");
    context.set_flags("username", ItemFlags::EXTRACTABLE);
    context.insert(Item::new(
        "password",
        ItemType::Data,
        ItemFlags::SENSITIVE,
        b"secret".to_vec(),
    ));
    context.set_uint("uid", 501);
    context.set_flags("uid", ItemFlags::STICKY);

    let mut token_context = ItemStore::new();
    token_context.copy_with_flags(&context, ItemFlags::EXTRACTABLE);
    assert_eq!(token_context.len(), 1);
    assert_eq!(token_context.get_string("username"), Some("alice"));

    let mut sticky = ItemStore::new();
    sticky.copy_with_flags(&context, ItemFlags::STICKY);
    assert_eq!(sticky.get_uint("uid"), 501);
    assert!(!sticky.exists("password"));
}

#[test]
fn test_temporary_hints_are_removed() {
    let mut hints = ItemStore::new();
    hints.set_string("authorize-right", "system.privilege.admin");
    hints.set_flags("authorize-right", ItemFlags::TEMPORARY);
    hints.set_int("tries", 1);

    hints.remove_with_flags(ItemFlags::TEMPORARY);
    assert!(!hints.exists("authorize-right"));
    assert_eq!(hints.get_int("tries"), 1);
}

#[test]
fn test_collect_and_copy() {
    let store: ItemStore = vec![
        Item::new("a", ItemType::Bool, ItemFlags::empty(), vec![1]),
        Item::new("b", ItemType::Int64, ItemFlags::VOLATILE, 9i64.to_le_bytes().to_vec()),
    ]
    .into_iter()
    .collect();

    let mut copy = ItemStore::new();
    copy.set_bool("a", false);
    copy.copy(&store);
    assert!(copy.get_bool("a"));
    assert_eq!(copy.get_int64("b"), 9);
    assert_eq!(copy.get_flags("b"), ItemFlags::VOLATILE);
    let mut keys: Vec<_> = copy.keys().collect();
    keys.sort();
    assert_eq!(keys, vec!["a", "b"]);
}
