//! Compilation session
//!
//! A [`Session`] is the unit of isolation: it owns one [`TypeRegistry`],
//! one artifact cache and one cancellation token. Two sessions never share
//! state, so they can run on different threads without coordination.

use crate::pipeline;
use crate::program::ProgramSpec;
use crate::DriverError;
use dashmap::DashMap;
use metast_codegen::Artifact;
use metast_error::{CompileError, Diagnostic, Diagnostics};
use metast_ir::{BackendKind, CancelToken, CompilationUnit, Environment, NodeKind, TypeRegistry, Value};
use metast_runtime::{Limits, Loader};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Artifact cache counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Default)]
pub struct Session {
    registry: TypeRegistry,
    /// Keyed by unit fingerprint; the unit is kept to rule out collisions
    cache: DashMap<u64, (CompilationUnit, Artifact)>,
    hits: AtomicU64,
    misses: AtomicU64,
    cancel: CancelToken,
    limits: Limits,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Token shared by every compilation of this session
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Cancels in-flight and future compilations of this session
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Closes the type registration phase
    pub fn seal_types(&self) {
        self.registry.seal();
    }

    /// Builds a unit from a program description
    pub fn load(&self, spec: &ProgramSpec) -> Result<CompilationUnit, CompileError> {
        let unit = spec.to_unit(&self.registry)?;
        debug!(unit = unit.name(), functions = unit.functions().count(), "loaded program");
        Ok(unit)
    }

    /// Reads and builds a JSON program file
    pub fn load_file(&self, path: &Path) -> Result<CompilationUnit, DriverError> {
        let text = fs::read_to_string(path).map_err(|e| DriverError::io(path, e))?;
        let spec = ProgramSpec::from_json(&text)?;
        Ok(self.load(&spec)?)
    }

    /// Runs the transform engine only
    pub fn optimize(&self, unit: &CompilationUnit) -> Result<CompilationUnit, CompileError> {
        metast_opt::optimize(unit, &self.cancel)
    }

    /// Compiles `unit`, reusing a cached artifact for an identical unit
    pub fn compile(&self, unit: &CompilationUnit) -> Result<Artifact, CompileError> {
        if self.cancel.is_cancelled() {
            return Err(CompileError::Cancelled);
        }
        let key = unit.fingerprint();
        if let Some(entry) = self.cache.get(&key) {
            let (cached_unit, artifact) = entry.value();
            if cached_unit == unit {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(unit = unit.name(), key, "artifact cache hit");
                return Ok(artifact.clone());
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let compiled = pipeline::compile(unit, &self.cancel)?;
        self.cache
            .insert(key, (unit.clone(), compiled.artifact.clone()));
        Ok(compiled.artifact)
    }

    /// Compiles independent units in parallel; results keep input order
    pub fn compile_all(&self, units: &[CompilationUnit]) -> Vec<Result<Artifact, CompileError>> {
        let results: Vec<_> = units.par_iter().map(|unit| self.compile(unit)).collect();
        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(units = units.len(), failed, "batch compiled");
        results
    }

    /// Loads and compiles every program file in one batch
    ///
    /// Each failure becomes an error diagnostic naming its file; units that
    /// compile are also checked for inputs they never read.
    pub fn check_files(&self, paths: &[PathBuf]) -> Diagnostics {
        let mut diagnostics = Diagnostics::new();
        let mut loaded = Vec::with_capacity(paths.len());
        for path in paths {
            match self.load_file(path) {
                Ok(unit) => loaded.push((path, unit)),
                Err(e) => diagnostics.push(e.diagnostic().with_note(in_file(path))),
            }
        }

        let units: Vec<CompilationUnit> = loaded.iter().map(|(_, unit)| unit.clone()).collect();
        for ((path, unit), result) in loaded.iter().zip(self.compile_all(&units)) {
            if let Err(e) = result {
                diagnostics.push(Diagnostic::from(&e).with_note(in_file(path)));
                continue;
            }
            for name in unused_inputs(unit) {
                diagnostics.push(
                    Diagnostic::warning(format!("input `{}` is never read", name))
                        .with_note(in_file(path))
                        .with_help("remove it from `inputs` or reference it"),
                );
            }
        }
        debug!(files = paths.len(), diagnostics = diagnostics.len(), "checked files");
        diagnostics
    }

    /// Compiles `unit` to bytecode, whatever its configured backend, and
    /// runs it under the session's limits
    pub fn run(&self, unit: &CompilationUnit, inputs: &Environment) -> Result<Value, DriverError> {
        let options = unit.options().with_backend(BackendKind::Bytecode);
        let artifact = self.compile(&unit.clone().with_options(options))?;
        Ok(Loader::with_limits(self.limits).run(&artifact, inputs)?)
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            entries: self.cache.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

fn in_file(path: &Path) -> String {
    format!("in {}", path.display())
}

/// Declared inputs no `var` in the unit refers to
fn unused_inputs(unit: &CompilationUnit) -> Vec<String> {
    let mut unread: BTreeSet<String> =
        unit.inputs().signature().into_iter().map(|(name, _)| name).collect();
    let mut pending: Vec<_> = unit.roots().collect();
    while let Some(node) = pending.pop() {
        if unread.is_empty() {
            break;
        }
        if let NodeKind::Var { name, .. } = node.kind() {
            unread.remove(name);
        }
        pending.extend(node.children());
    }
    unread.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use metast_error::{DiagnosticRenderer, Level, RuntimeError};
    use metast_ir::builder::*;
    use metast_ir::{CompileOptions, OptLevel, Type, UnitBuilder};
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn unit_with(name: &str, backend: BackendKind, n: i64) -> CompilationUnit {
        UnitBuilder::new(name)
            .input("x", Type::i64())
            .options(CompileOptions::new(backend, OptLevel::Basic))
            .build(add(var("x", Type::i64()), i64(n)).unwrap())
            .unwrap()
    }

    #[test]
    fn test_cache_hits_on_identical_units() {
        let session = Session::new();
        let unit = unit_with("u", BackendKind::Js, 1);
        let first = session.compile(&unit).unwrap();
        let second = session.compile(&unit).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            session.cache_stats(),
            CacheStats {
                entries: 1,
                hits: 1,
                misses: 1
            }
        );

        // Options are part of the key
        session.compile(&unit_with("u", BackendKind::Formula, 1)).unwrap();
        assert_eq!(session.cache_stats().entries, 2);

        session.clear_cache();
        assert_eq!(session.cache_stats().entries, 0);
    }

    #[test]
    fn test_compile_all_keeps_order() {
        let session = Session::new();
        let units: Vec<_> = (0..16)
            .map(|n| unit_with(&format!("u{}", n), BackendKind::Formula, n))
            .collect();
        let results = session.compile_all(&units);
        assert_eq!(results.len(), 16);
        for (n, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap().as_text().unwrap(), format!("=(x+{})\n", n));
        }
    }

    #[test]
    fn test_run_forces_bytecode() {
        let session = Session::new();
        let unit = unit_with("u", BackendKind::Formula, 2);
        let inputs = Environment::new().with_value("x", 40i64);
        assert_eq!(session.run(&unit, &inputs).unwrap(), Value::I64(42));
    }

    #[test]
    fn test_run_reports_runtime_errors() {
        let session = Session::new();
        let unit = UnitBuilder::new("u")
            .input("d", Type::i64())
            .build(div(i64(1), var("d", Type::i64())).unwrap())
            .unwrap();
        let err = session
            .run(&unit, &Environment::new().with_value("d", 0i64))
            .unwrap_err();
        assert!(matches!(err, DriverError::Runtime(RuntimeError::DivisionByZero)));
    }

    #[test]
    fn test_cancelled_session() {
        let session = Session::new();
        session.cancel();
        let err = session.compile(&unit_with("u", BackendKind::Js, 1)).unwrap_err();
        assert_eq!(err, CompileError::Cancelled);
        assert_eq!(session.cache_stats().entries, 0);
    }

    #[test]
    fn test_cancel_wins_over_cache_hit() {
        let session = Session::new();
        let unit = unit_with("u", BackendKind::Js, 1);
        session.compile(&unit).unwrap();
        session.cancel();
        assert_eq!(session.compile(&unit).unwrap_err(), CompileError::Cancelled);
        assert_eq!(session.cache_stats().hits, 0);
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"name":"one","entry":{{"kind":"int","value":1}}}}"#).unwrap();
        let session = Session::new();
        let unit = session.load_file(file.path()).unwrap();
        assert_eq!(session.run(&unit, &Environment::new()).unwrap(), Value::I64(1));

        let missing = session.load_file(Path::new("/definitely/not/here.json"));
        assert!(matches!(missing, Err(DriverError::Io { .. })));
    }

    fn program_file(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_check_files_collects_every_problem() {
        let good = program_file(
            r#"{"name":"good","inputs":{"x":"i64"},"entry":{"kind":"var","name":"x"}}"#,
        );
        let unused = program_file(
            r#"{"name":"unused","inputs":{"x":"i64","y":"i64"},"entry":{"kind":"var","name":"x"}}"#,
        );
        let mismatch = program_file(
            r#"{"name":"bad","entry":{"kind":"binary","op":"+",
                "lhs":{"kind":"int","value":1},"rhs":{"kind":"str","value":"a"}}}"#,
        );
        let paths = vec![
            good.path().to_path_buf(),
            unused.path().to_path_buf(),
            mismatch.path().to_path_buf(),
            PathBuf::from("/definitely/not/here.json"),
        ];

        let session = Session::new();
        let diagnostics = session.check_files(&paths);
        assert_eq!(diagnostics.len(), 3);
        assert!(diagnostics.has_errors());

        let levels: Vec<Level> = diagnostics.iter().map(|d| d.level).collect();
        // Load failures come first, then the compiled batch
        assert_eq!(levels, vec![Level::Error, Level::Error, Level::Warning]);

        let rendered = diagnostics.render(&DiagnosticRenderer::new().without_colors());
        assert!(rendered.contains("cannot access `/definitely/not/here.json`"));
        assert!(rendered.contains("warning: input `y` is never read"));
        assert!(rendered.contains("error[EB002]"));
        assert!(rendered.contains(&format!("in {}", mismatch.path().display())));
    }

    #[test]
    fn test_check_files_clean_batch() {
        let file = program_file(r#"{"name":"one","entry":{"kind":"int","value":1}}"#);
        let diagnostics = Session::new().check_files(&[file.path().to_path_buf()]);
        assert!(diagnostics.is_empty());
        assert!(!diagnostics.has_errors());
    }

    #[test]
    fn test_sessions_are_isolated() {
        let a = Session::new();
        let b = Session::new();
        a.registry().define_type("Meters", metast_ir::Shape::F64).unwrap();
        b.registry().define_type("Meters", metast_ir::Shape::I64).unwrap();
        a.seal_types();
        assert!(a.registry().is_sealed());
        assert!(!b.registry().is_sealed());
    }
}
