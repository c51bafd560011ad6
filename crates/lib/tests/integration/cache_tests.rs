//! `CachedBuilder` behaviour over memory and on-disk caches.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, RwLock};

use kiln_lib::builder::{Builder, BuilderId};
use kiln_lib::cache::{BuildCache, CacheError, CachedBuilder, FileBuildCache, MemoryBuildCache};
use kiln_lib::deps::{DependenciesRef, MultipleDependencies, ParametersDependencies, SourceSet, SourceSetDependencies};
use kiln_lib::execute::{BuildConfig, BuildContext, BuildError};
use kiln_lib::fingerprint::{Fingerprint, ProtocolRegistry};
use kiln_lib::fs::{FileSystemDirectory, LocalDirectory, RelativePath};
use tracing_test::traced_test;

use super::common::{TestEnv, block_on, paths, rel};

fn params(value: u32) -> Arc<RwLock<u32>> {
  Arc::new(RwLock::new(value))
}

#[test]
fn unchanged_inputs_run_the_builder_at_most_once() {
  let env = TestEnv::new();
  let inputs = params(1);
  let inner = env
    .builder("compile")
    .outputs(&["bin/app.dll"])
    .dependencies(Arc::new(ParametersDependencies::new("csc", inputs)))
    .build();
  let cache = Arc::new(MemoryBuildCache::new());
  let cached = CachedBuilder::new(inner.node(), cache.clone(), env.target.clone());

  let results: Vec<BTreeSet<RelativePath>> = (0..5).map(|_| cached.run().unwrap()).collect();

  assert_eq!(inner.runs(), 1);
  assert!(results.iter().all(|r| *r == paths(&["bin/app.dll"])));
  assert_eq!(cache.len(), 1);
}

#[test]
fn changed_fingerprint_runs_the_builder_again() {
  let env = TestEnv::new();
  let inputs = params(1);
  let inner = env
    .builder("compile")
    .outputs(&["bin/app.dll"])
    .dependencies(Arc::new(ParametersDependencies::new("csc", inputs.clone())))
    .build();
  let cached = CachedBuilder::new(inner.node(), Arc::new(MemoryBuildCache::new()), env.target.clone());

  cached.run().unwrap();
  *inputs.write().unwrap() = 2;
  cached.run().unwrap();
  cached.run().unwrap();

  assert_eq!(inner.runs(), 2);
}

#[test]
fn failed_runs_are_never_cached() {
  let env = TestEnv::new();
  let inner = env.builder("flaky").outputs(&["out.txt"]).failing().build();
  let cache = Arc::new(MemoryBuildCache::new());
  let cached = CachedBuilder::new(inner.node(), cache.clone(), env.target.clone());

  assert!(cached.run().is_err());
  assert!(cache.is_empty());

  inner.set_failing(false);
  assert_eq!(cached.run().unwrap(), paths(&["out.txt"]));
  assert_eq!(cached.run().unwrap(), paths(&["out.txt"]));
  assert_eq!(inner.runs(), 2);
}

#[test]
fn cached_builder_keeps_the_inner_identity() {
  let env = TestEnv::new();
  let inner = env.builder("compile").build();
  let cached = CachedBuilder::new(inner.node(), Arc::new(MemoryBuildCache::new()), env.target.clone());

  assert_eq!(cached.id(), inner.id());
  let a = cached.dependencies().create_fingerprint().unwrap();
  let b = inner.dependencies().create_fingerprint().unwrap();
  assert!(*a == *b);
}

#[test]
fn concurrent_runs_of_one_identity_compute_once() {
  let env = TestEnv::new();
  let inner = env
    .builder("slow")
    .outputs(&["slow.bin"])
    .delay_ms(30)
    .dependencies(Arc::new(ParametersDependencies::new("p", params(7))))
    .build();
  let cached = CachedBuilder::new(inner.node(), Arc::new(MemoryBuildCache::new()), env.target.clone());

  std::thread::scope(|scope| {
    let handles: Vec<_> = (0..8).map(|_| scope.spawn(|| cached.run().unwrap())).collect();
    for handle in handles {
      assert_eq!(handle.join().unwrap(), paths(&["slow.bin"]));
    }
  });

  assert_eq!(inner.runs(), 1);
}

/// A cache that claims every stored entry but cannot restore it.
struct UnrestorableCache {
  inner: MemoryBuildCache,
  restores: Mutex<usize>,
}

impl BuildCache for UnrestorableCache {
  fn identity_lock(&self, id: &BuilderId) -> Arc<Mutex<()>> {
    self.inner.identity_lock(id)
  }

  fn contains(&self, id: &BuilderId, fingerprint: &dyn Fingerprint) -> bool {
    self.inner.contains(id, fingerprint)
  }

  fn store(
    &self,
    id: &BuilderId,
    fingerprint: &dyn Fingerprint,
    outputs: &BTreeSet<RelativePath>,
    source: &dyn FileSystemDirectory,
  ) -> Result<(), CacheError> {
    self.inner.store(id, fingerprint, outputs, source)
  }

  fn restore(&self, id: &BuilderId, _target: &dyn FileSystemDirectory) -> Result<BTreeSet<RelativePath>, CacheError> {
    *self.restores.lock().unwrap() += 1;
    Err(CacheError::Corrupt {
      id: id.clone(),
      reason: "artifact vanished".to_string(),
    })
  }
}

#[test]
#[traced_test]
fn restore_fault_falls_back_to_running_the_builder() {
  let env = TestEnv::new();
  let inner = env.builder("compile").outputs(&["a.dll"]).build();
  let cache = Arc::new(UnrestorableCache {
    inner: MemoryBuildCache::new(),
    restores: Mutex::new(0),
  });
  let cached = CachedBuilder::new(inner.node(), cache.clone(), env.target.clone());

  assert_eq!(cached.run().unwrap(), paths(&["a.dll"]));
  assert_eq!(cached.run().unwrap(), paths(&["a.dll"]));

  assert_eq!(inner.runs(), 2);
  assert_eq!(*cache.restores.lock().unwrap(), 1);
  assert!(logs_contain("cache restore failed, rebuilding"));
}

#[test]
fn on_disk_cache_skips_unchanged_builders_across_builds() {
  let temp = tempfile::tempdir().unwrap();
  let sources = Arc::new(LocalDirectory::new(temp.path().join("suite")));
  sources.write_file(&rel("src/main.cs"), b"class Main {}").unwrap();
  sources.write_file(&rel("src/util.cs"), b"class Util {}").unwrap();
  let source_set = SourceSet::scan("src", &*sources, None).unwrap().into_shared();

  let cache: Arc<dyn BuildCache> =
    Arc::new(FileBuildCache::open(temp.path().join("cache"), Arc::new(ProtocolRegistry::with_defaults())).unwrap());

  let env = TestEnv::new();
  let source_deps: DependenciesRef = Arc::new(SourceSetDependencies::new(sources.clone(), source_set));
  let generate = env
    .builder("generate")
    .outputs(&["gen/version.cs"])
    .dependencies(source_deps.clone())
    .build();
  let optimize = params(0);
  let compile = env
    .builder("compile")
    .outputs(&["bin/app.dll"])
    .after(&[&generate])
    .dependencies(Arc::new(MultipleDependencies::new([
      source_deps,
      Arc::new(ParametersDependencies::new("csc", optimize.clone())) as DependenciesRef,
    ])))
    .build();

  let build = || {
    let cached_generate: Arc<dyn Builder> =
      Arc::new(CachedBuilder::new(generate.node(), cache.clone(), env.target.clone()));
    let cached_compile: Arc<dyn Builder> =
      Arc::new(CachedBuilder::new(compile.node(), cache.clone(), env.target.clone()));

    let mut ctx = BuildContext::new(BuildConfig::default());
    ctx.add_builder(cached_compile.clone(), [cached_generate]).unwrap();
    block_on(ctx.run(Some(cached_compile.id()))).unwrap()
  };

  let first = build();
  assert_eq!(first, paths(&["gen/version.cs", "bin/app.dll"]));
  assert_eq!((generate.runs(), compile.runs()), (1, 1));

  env.target.delete_file(&rel("bin/app.dll")).unwrap();
  let second = build();
  assert_eq!(second, first);
  assert_eq!((generate.runs(), compile.runs()), (1, 1));
  assert_eq!(env.target.read_file(&rel("bin/app.dll")).unwrap(), b"compile");

  sources.write_file(&rel("src/util.cs"), b"class Util { int x; }").unwrap();
  build();
  assert_eq!((generate.runs(), compile.runs()), (2, 2));

  *optimize.write().unwrap() = 2;
  build();
  assert_eq!((generate.runs(), compile.runs()), (2, 3));

  build();
  assert_eq!((generate.runs(), compile.runs()), (2, 3));
}

#[test]
fn unreadable_input_fails_the_builder_in_context() {
  let env = TestEnv::new();
  let sources = Arc::new(kiln_lib::fs::MemoryDirectory::new("suite"));
  let set = SourceSet::new("src").with_files([rel("missing.cs")]).into_shared();
  let inner = env
    .builder("compile")
    .dependencies(Arc::new(SourceSetDependencies::new(sources, set)))
    .build();
  let dependent = env.builder("package").build();
  let cached: Arc<dyn Builder> = Arc::new(CachedBuilder::new(
    inner.node(),
    Arc::new(MemoryBuildCache::new()),
    env.target.clone(),
  ));

  let mut ctx = BuildContext::new(BuildConfig::default());
  ctx.add_builder(dependent.node(), [cached]).unwrap();
  let err = block_on(ctx.run(None)).unwrap_err();

  assert_eq!(inner.runs(), 0);
  assert_eq!(dependent.runs(), 0);
  match err {
    BuildError::BuilderFailed { builder, source } => {
      assert_eq!(builder, *inner.id());
      assert!(source.to_string().contains("missing.cs"), "{source}");
    }
    other => panic!("unexpected error {other:?}"),
  }
}
