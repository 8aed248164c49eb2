//! End-to-end exercises of discovery → dependency resolution → load/unload
//! across a whole plugin root, as opposed to the unit tests in each module
//! that exercise one stage at a time in isolation. A genuine load still
//! needs a real `cdylib`, which nothing in this workspace can build without
//! the toolchain, so these stop short of a working `Plugin::init` call and
//! instead verify the pipeline that gets a manifest from disk to a load
//! attempt in the right order, with the right error surfaced when that
//! order can't be determined.

use std::sync::Arc;

use ncatbot_config::PluginConfigStore;
use ncatbot_eventbus::EventBus;
use ncatbot_plugins::{discover, resolve_order, CommandRegistry, PluginLoader};
use ncatbot_rbac::RbacEngine;

fn write_manifest(dir: &std::path::Path, name: &str, main: &str, deps: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join("manifest.toml"),
        format!("name = \"{name}\"\nversion = \"0.1.0\"\nmain = \"{main}\"\n{deps}"),
    )
    .unwrap();
    std::fs::write(dir.join(format!("{main}.{}", std::env::consts::DLL_EXTENSION)), b"not a shared library").unwrap();
}

fn loader(root: &std::path::Path) -> PluginLoader {
    PluginLoader::new(
        root,
        Arc::new(EventBus::default()),
        Arc::new(PluginConfigStore::new(root.join("config.yaml"))),
        Arc::new(RbacEngine::new("user")),
        Arc::new(CommandRegistry::new()),
    )
}

#[test]
fn discovery_and_resolution_order_a_three_plugin_dependency_chain() {
    let root = tempfile::tempdir().unwrap();
    write_manifest(&root.path().join("charlie"), "charlie", "lib", "[dependencies]\nbravo = \"^1.0.0\"\n");
    write_manifest(&root.path().join("bravo"), "bravo", "lib", "[dependencies]\nalpha = \"^1.0.0\"\n");
    write_manifest(&root.path().join("alpha"), "alpha", "lib", "");

    let discovered = discover(root.path());
    assert_eq!(discovered.len(), 3);

    let order = resolve_order(&discovered).unwrap();
    assert_eq!(order, vec!["alpha", "bravo", "charlie"]);
}

#[tokio::test]
async fn load_all_stops_at_the_first_unresolvable_dependency() {
    let root = tempfile::tempdir().unwrap();
    write_manifest(&root.path().join("needs-missing"), "needs-missing", "lib", "[dependencies]\nghost = \"^1.0.0\"\n");
    write_manifest(&root.path().join("standalone"), "standalone", "lib", "");

    let loader = loader(root.path());
    let result = loader.load_all().await;

    assert!(result.is_err());
    // Dependency resolution runs before any plugin is constructed, so a plugin
    // whose dependency is unsatisfiable never gets recorded at all — not even
    // as a Failed instance — and `standalone` (independent of the broken one)
    // is never attempted either, since `resolve_order` fails before `load_one`
    // runs for anything.
    assert!(loader.states().await.is_empty());
}

#[tokio::test]
async fn load_all_reports_a_dependency_cycle_without_loading_anything() {
    let root = tempfile::tempdir().unwrap();
    write_manifest(&root.path().join("a"), "a", "lib", "[dependencies]\nb = \"1.0.0\"\n");
    write_manifest(&root.path().join("b"), "b", "lib", "[dependencies]\na = \"1.0.0\"\n");

    let loader = loader(root.path());
    assert!(loader.load_all().await.is_err());
    assert!(loader.states().await.is_empty());
}

#[tokio::test]
async fn each_plugin_in_an_independent_set_reaches_failed_state_via_its_own_dir() {
    // None of these stub "dylibs" are real shared objects, so every load
    // attempt fails at `PluginLibrary::load` — but each still gets recorded,
    // proving the loader walks the whole resolved order rather than bailing
    // out of the loop entirely (only the overall `Result` is `Err`, stopping
    // the *caller* from treating startup as a full success).
    let root = tempfile::tempdir().unwrap();
    write_manifest(&root.path().join("solo"), "solo", "lib", "");

    let loader = loader(root.path());
    assert!(loader.load_all().await.is_err());

    let states = loader.states().await;
    assert_eq!(states.get("solo").map(String::as_str).map(|s| s.starts_with("failed")), Some(true));
}

#[tokio::test]
async fn reload_dir_on_a_plugin_that_failed_its_first_load_retries_cleanly() {
    let root = tempfile::tempdir().unwrap();
    write_manifest(&root.path().join("flaky"), "flaky", "lib", "");

    let loader = loader(root.path());
    assert!(loader.load_all().await.is_err());
    assert!(loader.states().await.contains_key("flaky"));

    // The directory-to-id mapping recorded during the failed first load is
    // still enough to drive a hot reload by directory name.
    assert!(!loader.reload_dir("flaky").await);
    assert!(loader.states().await.contains_key("flaky"));
}
