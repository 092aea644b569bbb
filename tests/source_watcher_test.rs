//! 配置文件热重载集成测试

mod common;

use common::*;
use component_forge::config::{FileSourceLoader, PropertiesSource, SourceWatcher};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const DEBOUNCE: Duration = Duration::from_millis(50);

fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_missing_file_rejected() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(PropertiesSource::default());
    let result = SourceWatcher::new(dir.path().join("absent.toml"), source, DEBOUNCE);
    assert!(result.is_err());

    // 目录不是文件
    let source = Arc::new(PropertiesSource::default());
    assert!(SourceWatcher::new(dir.path(), source, DEBOUNCE).is_err());
}

#[tokio::test]
async fn test_load_properties_file_into_source() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "widgets.properties",
        "# widgets\nid1.widget.type=a\nid1.widget.name=from-file\nid1.widget.label=first\n",
    );
    let source = Arc::new(PropertiesSource::default());
    let (watcher, _events) = SourceWatcher::new(&path, Arc::clone(&source), DEBOUNCE).unwrap();

    let changed = watcher.load_now().await.unwrap();
    assert_eq!(changed.len(), 3);

    let fixture = fixture_from_source(source, with_both);
    let widget = fixture.module.manager().get("id1").unwrap();
    assert_eq!(widget.name(), "from-file");
    assert_eq!(widget.as_a().unwrap().label.get(), "first");
}

#[tokio::test]
async fn test_reload_updates_dynamic_values_only_for_changed_keys() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "widgets.toml",
        "[id1.widget]\ntype = \"a\"\nname = \"toml\"\nlabel = \"first\"\n",
    );
    let source = Arc::new(PropertiesSource::default());
    let (watcher, _events) = SourceWatcher::new(&path, Arc::clone(&source), DEBOUNCE).unwrap();
    let watcher = watcher.with_loader(FileSourceLoader::new(false));
    watcher.load_now().await.unwrap();

    let fixture = fixture_from_source(Arc::clone(&source), with_both);
    let widget = fixture.module.manager().get("id1").unwrap();
    assert_eq!(widget.name(), "toml");

    fs::write(
        &path,
        "[id1.widget]\ntype = \"a\"\nname = \"toml\"\nlabel = \"second\"\n",
    )
    .unwrap();
    let changed = watcher.load_now().await.unwrap();
    assert_eq!(changed, vec!["id1.widget.label".to_string()]);

    // 动态属性跟随，静态属性保持构建时的值
    let a = widget.as_a().unwrap();
    assert_eq!(a.label.get(), "second");
    assert_eq!(a.name, "toml");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_file_change_triggers_reload_event() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "live.properties", "id1.widget.type=a\nid1.widget.label=before\n");
    let source = Arc::new(PropertiesSource::default());
    let (mut watcher, mut events) =
        SourceWatcher::new(&path, Arc::clone(&source), DEBOUNCE).unwrap();
    watcher.load_now().await.unwrap();
    watcher.start().unwrap();

    let fixture = fixture_from_source(Arc::clone(&source), with_both);
    let widget = fixture.module.manager().get("id1").unwrap();

    // 给监控器留出注册时间
    tokio::time::sleep(Duration::from_millis(200)).await;
    fs::write(&path, "id1.widget.type=a\nid1.widget.label=after\n").unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("等待重载事件超时")
        .unwrap();
    assert_eq!(event.path, path);
    assert!(event.changed_keys.contains(&"id1.widget.label".to_string()));
    assert_eq!(widget.as_a().unwrap().label.get(), "after");

    watcher.stop();
}
