use safevfs::cadapter::memory::MemoryBackend;
use safevfs::cadapter::{RootPath, SafeBackend};
use safevfs::vfs::cache::EntryKind;
use safevfs::vfs::path::OpenMode;
use safevfs::{SafeVfs, VfsError};
use std::sync::Arc;

const MOUNT: &str = "/mnt/safe";

fn make_vfs() -> (SafeVfs, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    (SafeVfs::new(backend.clone(), MOUNT), backend)
}

async fn make_dir(backend: &MemoryBackend, path: &str, is_private: bool) {
    backend
        .create_directory(RootPath::Drive, path, is_private)
        .await
        .unwrap();
}

async fn write_file(vfs: &SafeVfs, path: &str, body: &[u8]) {
    let fh = vfs.create(path, OpenMode::Truncate).await.unwrap();
    if !body.is_empty() {
        assert_eq!(vfs.raw_write(fh, 0, body).await.unwrap(), body.len());
    }
    vfs.raw_close(fh).await.unwrap();
}

async fn read_file(vfs: &SafeVfs, path: &str) -> Vec<u8> {
    let fh = vfs.raw_open(path, OpenMode::Read).await.unwrap();
    let data = vfs.raw_read(fh, 0, 4096).await.unwrap();
    vfs.raw_close(fh).await.unwrap();
    data
}

#[tokio::test]
async fn test_write_close_reopen_read_round_trip() {
    let (vfs, backend) = make_vfs();
    make_dir(&backend, "/docs", false).await;

    write_file(&vfs, "/public/docs/ten.bin", b"0123456789").await;
    let fh = vfs
        .raw_open("/public/docs/ten.bin", OpenMode::Read)
        .await
        .unwrap();
    assert_eq!(vfs.raw_read(fh, 0, 10).await.unwrap(), b"0123456789");
    assert_eq!(vfs.raw_read(fh, 8, 10).await.unwrap(), b"89");
    assert!(vfs.raw_read(fh, 10, 10).await.unwrap().is_empty());
    vfs.raw_close(fh).await.unwrap();

    let names = vfs.contents("/public/docs").await.unwrap();
    assert_eq!(
        names.iter().filter(|n| n.as_str() == "ten.bin").count(),
        1
    );
    assert_eq!(vfs.size("/public/docs/ten.bin").await.unwrap(), 10);
}

#[tokio::test]
async fn test_zero_byte_file_is_stored_as_newline() {
    let (vfs, backend) = make_vfs();
    make_dir(&backend, "/docs", true).await;

    write_file(&vfs, "/private/docs/empty", b"").await;
    assert_eq!(read_file(&vfs, "/private/docs/empty").await, b"\n");
    assert_eq!(
        backend.peek_file(RootPath::Drive, "/docs/empty").as_deref(),
        Some(&b"\n"[..])
    );
}

#[tokio::test]
async fn test_repeated_listing_fetches_once() {
    let (vfs, backend) = make_vfs();
    make_dir(&backend, "/docs", false).await;
    backend
        .create_file(RootPath::Drive, "/docs/a", b"a", false)
        .await
        .unwrap();

    let first = vfs.contents("/public/docs").await.unwrap();
    let second = vfs.contents("/public/docs").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(backend.calls("get_directory"), 1);
}

#[tokio::test]
async fn test_mutation_invalidates_parent_listing() {
    let (vfs, backend) = make_vfs();
    make_dir(&backend, "/docs", false).await;
    vfs.contents("/public/docs").await.unwrap();

    vfs.mkdir("/public/docs/sub").await.unwrap();
    let before = backend.calls("get_directory");
    let names = vfs.contents("/public/docs").await.unwrap();
    assert_eq!(names, vec!["sub"]);
    assert_eq!(backend.calls("get_directory"), before + 1);

    vfs.touch("/public/docs/note").await.unwrap();
    let before = backend.calls("get_directory");
    assert_eq!(
        vfs.contents("/public/docs").await.unwrap(),
        vec!["note", "sub"]
    );
    assert_eq!(backend.calls("get_directory"), before + 1);
}

#[tokio::test]
async fn test_directory_name_cannot_span_both_namespaces() {
    let (vfs, backend) = make_vfs();
    make_dir(&backend, "/shared", false).await;
    make_dir(&backend, "/secret", true).await;

    let err = vfs
        .rename("/private/secret", "/private/shared")
        .await
        .unwrap_err();
    assert!(matches!(err, VfsError::PermissionDenied { .. }));
    assert_eq!(backend.calls("rename_directory"), 0);
    assert_eq!(vfs.contents("/private").await.unwrap(), vec!["secret"]);
    assert_eq!(vfs.contents("/public").await.unwrap(), vec!["shared"]);

    // moving between namespaces is refused outright
    assert!(matches!(
        vfs.rename("/private/secret", "/public/secret").await,
        Err(VfsError::PermissionDenied { .. })
    ));
}

#[tokio::test]
async fn test_rmdir_refuses_until_empty() {
    let (vfs, backend) = make_vfs();
    make_dir(&backend, "/docs", false).await;
    make_dir(&backend, "/docs/old", false).await;
    // the file is private but lives in the same backend directory
    backend
        .create_file(RootPath::Drive, "/docs/old/f", b"x", true)
        .await
        .unwrap();

    assert!(matches!(
        vfs.rmdir("/public/docs/old").await,
        Err(VfsError::NotEmpty { .. })
    ));
    vfs.delete("/private/docs/old/f").await.unwrap();
    vfs.rmdir("/public/docs/old").await.unwrap();
    assert!(!vfs.is_directory("/public/docs/old").await.unwrap());
    assert!(matches!(
        vfs.rmdir("/public/docs/old").await,
        Err(VfsError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_malformed_external_domain_fails_before_backend() {
    let (vfs, backend) = make_vfs();
    let calls = backend.total_calls();
    assert!(matches!(
        vfs.contents("/outside/service").await,
        Err(VfsError::InvalidArgument { .. })
    ));
    assert!(matches!(
        vfs.mkdir("/outside/a.b.c").await,
        Err(VfsError::InvalidArgument { .. })
    ));
    assert_eq!(backend.total_calls(), calls);
}

#[tokio::test]
async fn test_symlink_across_namespaces() {
    let (vfs, backend) = make_vfs();
    make_dir(&backend, "/vault", true).await;
    make_dir(&backend, "/links", false).await;

    vfs.symlink("/mnt/safe/private/vault", "/public/links/link")
        .await
        .unwrap();
    assert_eq!(
        vfs.readlink("/public/links/link").await.unwrap(),
        "/mnt/safe/private/vault"
    );
    assert!(vfs.is_file("/public/links/link").await.unwrap());
    assert!(!vfs.is_directory("/public/links/link").await.unwrap());
    assert!(vfs.is_symlink("/public/links/link").await.unwrap());

    let attr = vfs.getattr("/public/links/link").await.unwrap();
    assert_eq!((attr.kind, attr.perm), (EntryKind::Symlink, 0o777));
    // the link is not visible from the private side
    assert!(!vfs.is_file("/private/links/link").await.unwrap());

    vfs.rename("/public/links/link", "/public/links/renamed").await.unwrap();
    assert_eq!(
        vfs.readlink("/public/links/renamed").await.unwrap(),
        "/mnt/safe/private/vault"
    );
    assert!(
        backend
            .peek_file(RootPath::Drive, "/links/.SAFE_SYMLINK_PUBLIC.renamed")
            .is_some()
    );
}

#[tokio::test]
async fn test_rename_moves_and_renames_files() {
    let (vfs, backend) = make_vfs();
    make_dir(&backend, "/a", false).await;
    make_dir(&backend, "/b", false).await;
    write_file(&vfs, "/public/a/one.txt", b"1").await;

    vfs.rename("/public/a/one.txt", "/public/b/two.txt")
        .await
        .unwrap();
    assert_eq!(backend.calls("move_file"), 1);
    assert_eq!(backend.calls("rename_file"), 1);
    assert!(vfs.contents("/public/a").await.unwrap().is_empty());
    assert_eq!(vfs.contents("/public/b").await.unwrap(), vec!["two.txt"]);
    assert_eq!(read_file(&vfs, "/public/b/two.txt").await, b"1");

    assert!(matches!(
        vfs.rename("/public/a/missing", "/public/b/x").await,
        Err(VfsError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_external_domain_is_browsable_and_read_only() {
    let (vfs, backend) = make_vfs();
    // somebody else's site
    make_dir(&backend, "/site", false).await;
    backend
        .create_file(RootPath::Drive, "/site/index.html", b"<h1>hi</h1>", false)
        .await
        .unwrap();
    backend.publish_service("friend", "www", "/site");

    vfs.mkdir("/outside/www.friend").await.unwrap();
    assert_eq!(vfs.contents("/outside").await.unwrap(), vec!["www.friend"]);
    assert_eq!(
        vfs.contents("/outside/www.friend").await.unwrap(),
        vec!["index.html"]
    );
    assert_eq!(
        read_file(&vfs, "/outside/www.friend/index.html").await,
        b"<h1>hi</h1>"
    );
    assert_eq!(vfs.getattr("/outside/www.friend").await.unwrap().perm, 0o555);
    assert_eq!(
        vfs.getattr("/outside/www.friend/index.html")
            .await
            .unwrap()
            .perm,
        0o444
    );
    assert!(matches!(
        vfs.raw_open("/outside/www.friend/index.html", OpenMode::Update)
            .await,
        Err(VfsError::PermissionDenied { .. })
    ));
    assert!(matches!(
        vfs.mkdir("/outside/www.friend/sub").await,
        Err(VfsError::PermissionDenied { .. })
    ));

    vfs.rmdir("/outside/www.friend").await.unwrap();
    assert!(vfs.contents("/outside").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_dns_services_appear_as_links() {
    let (vfs, backend) = make_vfs();
    backend.register_long_name("me");
    make_dir(&backend, "/blog", false).await;

    assert_eq!(vfs.contents("/dns").await.unwrap(), vec!["me"]);
    vfs.symlink("/mnt/safe/public/blog", "/dns/me/www")
        .await
        .unwrap();
    assert_eq!(vfs.contents("/dns/me").await.unwrap(), vec!["www"]);
    assert!(vfs.is_symlink("/dns/me/www").await.unwrap());
    assert_eq!(
        vfs.readlink("/dns/me/www").await.unwrap(),
        "/mnt/safe/public/blog"
    );
    assert!(matches!(
        vfs.mkdir("/dns/other").await,
        Err(VfsError::PermissionDenied { .. })
    ));
    assert!(matches!(
        vfs.contents("/dns/me/www").await,
        Err(VfsError::PermissionDenied { .. })
    ));
}

#[tokio::test]
async fn test_interrupted_rewrite_is_reported() {
    let (vfs, backend) = make_vfs();
    make_dir(&backend, "/docs", false).await;
    write_file(&vfs, "/public/docs/a", b"v1").await;

    let fh = vfs
        .raw_open("/public/docs/a", OpenMode::Update)
        .await
        .unwrap();
    vfs.raw_write(fh, 0, b"v2").await.unwrap();
    backend.fail_next("create_file");
    let err = vfs.raw_close(fh).await.unwrap_err();
    assert!(matches!(err, VfsError::PartialRewrite { .. }));
    assert_eq!(err.errno(), libc::EIO);
    assert!(!vfs.is_file("/public/docs/a").await.unwrap());
}
