use {
    crate::{Device, diff, init_logging, random_tree, resource_folder},
    cloudex_protocol::{Bucket, ContentHash, FileInfo, FileType, ObjectKey},
    cloudex_sdk::{
        CloudFileState, ExchangeError, ResourceInfo,
        package::{Packager, ZipPackager},
        store::MemoryObjectStore,
    },
    fs_err::write,
};

const MODELS: &str = FileInfo::ICON_MODELS;

async fn paired(store: &MemoryObjectStore) -> (Device, Device) {
    let mut a = Device::new(store).unwrap();
    let mut b = Device::new(store).unwrap();
    let code = a.link_mut().unwrap().generate_code_and_link().await.unwrap();
    b.link_mut()
        .unwrap()
        .link_with_existing_code(&code.as_str().to_lowercase())
        .await
        .unwrap();
    (a, b)
}

#[tokio::test]
async fn exchange_between_two_devices() {
    init_logging();
    let store = MemoryObjectStore::new();
    let (a, b) = paired(&store).await;
    assert!(a.manager.is_linked_with_default_link());
    assert!(b.manager.is_linked_with_default_link());

    let source = a.work_dir("house");
    random_tree(&source, "house.glb").unwrap();
    let hash = a
        .link()
        .unwrap()
        .upload_resource_to_cloud(&source, "house.glb", FileType::ArkioExport, MODELS, 3)
        .await
        .unwrap();
    assert_eq!(store.keys(Bucket::File).len(), 3);

    let (found, entry) = b.latest("house.glb").await.unwrap();
    assert_eq!(found, hash);
    assert_eq!(entry.nr_of_parts(), 3);
    assert!(!b.manager.is_entry_already_downloaded(&entry, &b.import_dir()).unwrap());

    let folder = b.download(&hash, &entry).await.unwrap();
    assert_eq!(folder, resource_folder(&b.import_dir(), MODELS, "house.glb"));
    diff(&source, &folder).unwrap();
    assert_eq!(b.manager.download_attempts(&hash), 1);
    assert!(!b.manager.is_any_file_downloading());

    let index = b.link().unwrap().download_index().await.unwrap().unwrap();
    assert_eq!(
        b.manager.file_state("house.glb", "Models/", &index, |_| None),
        CloudFileState::Importing
    );
    assert_eq!(
        a.manager.file_state("house.glb", "Models/", &index, |_| None),
        CloudFileState::NewVersionAvailable
    );
}

#[tokio::test]
async fn invite_code_adds_third_device() {
    init_logging();
    let store = MemoryObjectStore::new();
    let (a, b) = paired(&store).await;
    let invite = b.link().unwrap().generate_invite_code().await.unwrap();

    let mut c = Device::new(&store).unwrap();
    c.link_mut()
        .unwrap()
        .link_with_existing_code(invite.as_str())
        .await
        .unwrap();
    assert_eq!(c.link().unwrap().link_key(), a.link().unwrap().link_key());

    let source = a.work_dir("plan");
    random_tree(&source, "plan.png").unwrap();
    a.link()
        .unwrap()
        .upload_resource_to_cloud(&source, "plan.png", FileType::ArkioPhotoExport, FileInfo::ICON_IMAGES, 2)
        .await
        .unwrap();
    let (hash, entry) = c.latest("plan.png").await.unwrap();
    let folder = c.download(&hash, &entry).await.unwrap();
    diff(&source, &folder).unwrap();

    // A separate group sees nothing of it.
    let mut stranger = Device::new(&store).unwrap();
    stranger
        .link_mut()
        .unwrap()
        .generate_code_and_link()
        .await
        .unwrap();
    assert!(stranger.link().unwrap().download_index().await.unwrap().is_none());
}

#[tokio::test]
async fn failed_part_upload_publishes_nothing() {
    init_logging();
    let store = MemoryObjectStore::new();
    let (a, b) = paired(&store).await;

    let source = a.work_dir("house");
    random_tree(&source, "house.glb").unwrap();
    let package = ZipPackager.package_folder(&source).unwrap();
    let hash = ContentHash::of(&package.data);
    store.fail_puts_of(Bucket::File, &ObjectKey::part(&hash, 1));

    let info = ResourceInfo {
        filename: "house.glb".into(),
        created: package.modified,
        file_type: FileType::ArkioExport,
        icon: MODELS.into(),
    };
    let err = a
        .link()
        .unwrap()
        .put_object(&hash, package.data, 3, info)
        .await
        .unwrap_err();
    let ExchangeError::PartialTransfer { failed_parts, .. } = err else {
        panic!("expected a partial transfer error, got {err}");
    };
    assert_eq!(failed_parts, vec![1]);
    assert!(b.link().unwrap().download_index().await.unwrap().is_none());
}

#[tokio::test]
async fn failed_part_download_keeps_previous_version() {
    init_logging();
    let store = MemoryObjectStore::new();
    let (a, b) = paired(&store).await;

    let source = a.work_dir("house");
    random_tree(&source, "house.glb").unwrap();
    let link = a.link().unwrap();
    link.upload_resource_to_cloud(&source, "house.glb", FileType::ArkioExport, MODELS, 3)
        .await
        .unwrap();
    let (first_hash, first) = b.latest("house.glb").await.unwrap();
    let folder = b.download(&first_hash, &first).await.unwrap();

    write(source.join("house.glb"), b"second version").unwrap();
    let second_hash = link
        .upload_resource_to_cloud(&source, "house.glb", FileType::ArkioExport, MODELS, 3)
        .await
        .unwrap();
    assert_ne!(first_hash, second_hash);
    let (latest_hash, latest) = b.latest("house.glb").await.unwrap();
    assert_eq!(latest_hash, second_hash);

    store.fail_gets_of(Bucket::File, &ObjectKey::part(&second_hash, 1));
    let err = b.download(&second_hash, &latest).await.unwrap_err();
    assert!(
        err.downcast_ref::<ExchangeError>()
            .is_some_and(|err| matches!(err, ExchangeError::PartialTransfer { .. })),
        "unexpected error: {err:#}"
    );
    assert!(!b.manager.is_any_file_downloading());
    assert_ne!(fs_err::read(folder.join("house.glb")).unwrap(), b"second version");

    store.clear_failures();
    b.download(&second_hash, &latest).await.unwrap();
    diff(&source, &folder).unwrap();
    assert_eq!(b.manager.download_attempts(&second_hash), 2);
}

#[tokio::test]
async fn concurrent_uploads_keep_both_entries() {
    init_logging();
    let store = MemoryObjectStore::new();
    let (a, b) = paired(&store).await;

    let house = a.work_dir("house");
    random_tree(&house, "house.glb").unwrap();
    let tree = b.work_dir("tree");
    random_tree(&tree, "tree.obj").unwrap();

    let (house_hash, tree_hash) = tokio::join!(
        a.link()
            .unwrap()
            .upload_resource_to_cloud(&house, "house.glb", FileType::ArkioExport, MODELS, 4),
        b.link()
            .unwrap()
            .upload_resource_to_cloud(&tree, "tree.obj", FileType::ArkioImport, MODELS, 2),
    );
    let (house_hash, tree_hash) = (house_hash.unwrap(), tree_hash.unwrap());

    let index = a.link().unwrap().download_index().await.unwrap().unwrap();
    assert!(index.find_entry(&house_hash).is_some());
    assert!(index.find_entry(&tree_hash).is_some());
    assert_eq!(index.active_file_entries().len(), 2);
}

#[tokio::test]
async fn links_survive_restart() {
    init_logging();
    let store = MemoryObjectStore::new();
    let (a, _b) = paired(&store).await;
    a.manager.save_to_storage().unwrap();
    let json = a.manager.serialize_to_json().unwrap();

    let mut restarted = Device::new(&store).unwrap();
    assert!(!restarted.has_default_link());
    restarted
        .manager
        .clear_links_and_create_from_json(&json)
        .unwrap();
    assert!(restarted.manager.is_linked_with_default_link());
    assert_eq!(
        restarted.link().unwrap().link_key(),
        a.link().unwrap().link_key()
    );
}
