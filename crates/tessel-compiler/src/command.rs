//! Command-line compiler: argument construction and execution.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tessel_util::error::UtilError;

use crate::diagnostics::parse_diagnostics;
use crate::error::CompilerError;
use crate::{CompilationResult, CompileInvocation, Compiler};

/// Command-line conventions of the wrapped compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagStyle {
    /// `javac`-style: `-d`, `-cp`, `-processor`, `-s`.
    #[default]
    Jvm,
    /// `cc`-style: `-c`, `-I`, `-D`; objects land in the working directory.
    Native,
}

/// Builder for one compiler command line.
#[derive(Debug, Default)]
pub struct CompilerCommand {
    style: FlagStyle,
    sources: Vec<PathBuf>,
    output_dir: Option<PathBuf>,
    classpath: Vec<PathBuf>,
    include_dirs: Vec<PathBuf>,
    defines: Vec<String>,
    plugins: Vec<PathBuf>,
    processors: Vec<String>,
    generated_sources_dir: Option<PathBuf>,
    extra_args: Vec<String>,
}

impl CompilerCommand {
    pub fn new(style: FlagStyle) -> Self {
        Self {
            style,
            ..Self::default()
        }
    }

    /// Seed every field from an invocation.
    pub fn from_invocation(style: FlagStyle, invocation: &CompileInvocation) -> Self {
        let cmd = Self::new(style)
            .sources(&invocation.sources)
            .output_dir(&invocation.output_dir)
            .classpath(&invocation.classpath)
            .include_dirs(&invocation.include_dirs)
            .defines(&invocation.defines)
            .plugins(&invocation.plugins)
            .processors(&invocation.processors);
        match &invocation.generated_sources_dir {
            Some(dir) => cmd.generated_sources_dir(dir),
            None => cmd,
        }
    }

    pub fn sources(mut self, paths: &[PathBuf]) -> Self {
        self.sources = paths.to_vec();
        self
    }

    pub fn output_dir(mut self, path: &Path) -> Self {
        self.output_dir = Some(path.to_path_buf());
        self
    }

    pub fn classpath(mut self, paths: &[PathBuf]) -> Self {
        self.classpath = paths.to_vec();
        self
    }

    pub fn include_dirs(mut self, paths: &[PathBuf]) -> Self {
        self.include_dirs = paths.to_vec();
        self
    }

    pub fn defines(mut self, defines: &[String]) -> Self {
        self.defines = defines.to_vec();
        self
    }

    pub fn plugins(mut self, paths: &[PathBuf]) -> Self {
        self.plugins = paths.to_vec();
        self
    }

    pub fn processors(mut self, class_names: &[String]) -> Self {
        self.processors = class_names.to_vec();
        self
    }

    pub fn generated_sources_dir(mut self, path: &Path) -> Self {
        self.generated_sources_dir = Some(path.to_path_buf());
        self
    }

    /// Arguments placed before the sources, verbatim.
    pub fn extra_args(mut self, args: &[String]) -> Self {
        self.extra_args = args.to_vec();
        self
    }

    /// Build the argument list without executing.
    ///
    /// # Errors
    /// Returns an error if sources or the output directory are not set.
    pub fn build_args(&self) -> Result<Vec<String>, CompilerError> {
        if self.sources.is_empty() {
            return Err(CompilerError::NoSources);
        }
        let Some(output_dir) = &self.output_dir else {
            return Err(CompilerError::NoOutput);
        };

        let mut args = Vec::new();
        match self.style {
            FlagStyle::Jvm => {
                args.push("-d".to_owned());
                args.push(output_dir.display().to_string());

                if !self.classpath.is_empty() {
                    args.push("-cp".to_owned());
                    args.push(join_paths(&self.classpath));
                }
                for plugin in &self.plugins {
                    args.push(format!("-Xplugin={}", plugin.display()));
                }
                if self.processors.is_empty() {
                    args.push("-proc:none".to_owned());
                } else {
                    args.push("-processor".to_owned());
                    args.push(self.processors.join(","));
                }
                if let Some(dir) = &self.generated_sources_dir {
                    args.push("-s".to_owned());
                    args.push(dir.display().to_string());
                }
            }
            FlagStyle::Native => {
                args.push("-c".to_owned());
                for dir in &self.include_dirs {
                    args.push(format!("-I{}", dir.display()));
                }
                for define in &self.defines {
                    args.push(format!("-D{define}"));
                }
                for plugin in &self.plugins {
                    args.push(format!("-fplugin={}", plugin.display()));
                }
            }
        }

        args.extend(self.extra_args.iter().cloned());
        args.extend(self.sources.iter().map(|s| s.display().to_string()));
        Ok(args)
    }

    fn output(&self) -> Result<&Path, CompilerError> {
        self.output_dir.as_deref().ok_or(CompilerError::NoOutput)
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    let sep = if cfg!(windows) { ";" } else { ":" };
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(sep)
}

fn absolute_all(paths: &[PathBuf]) -> Result<Vec<PathBuf>, CompilerError> {
    paths
        .iter()
        .map(|p| {
            std::path::absolute(p).map_err(|source| CompilerError::Io {
                path: p.display().to_string(),
                source,
            })
        })
        .collect()
}

/// Runs an external compiler binary.
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    program: PathBuf,
    style: FlagStyle,
    extra_args: Vec<String>,
}

impl CommandCompiler {
    pub fn new(program: impl Into<PathBuf>, style: FlagStyle) -> Self {
        Self {
            program: program.into(),
            style,
            extra_args: Vec::new(),
        }
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Compiler for CommandCompiler {
    fn compile(&self, invocation: &CompileInvocation) -> Result<CompilationResult, CompilerError> {
        let mut builder = CompilerCommand::from_invocation(self.style, invocation)
            .extra_args(&self.extra_args);

        // cc writes objects into its working directory, so every path it is
        // given must survive the directory change.
        if self.style == FlagStyle::Native {
            builder = builder
                .sources(&absolute_all(&invocation.sources)?)
                .include_dirs(&absolute_all(&invocation.include_dirs)?)
                .plugins(&absolute_all(&invocation.plugins)?);
        }

        let args = builder.build_args()?;
        let output_dir = builder.output()?;
        tessel_util::fs::ensure_dir(output_dir)?;
        if let Some(dir) = &invocation.generated_sources_dir {
            tessel_util::fs::ensure_dir(dir)?;
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&args);
        if self.style == FlagStyle::Native {
            cmd.current_dir(output_dir);
        }
        tracing::debug!(command = %tessel_util::process::describe(&cmd), "invoking compiler");

        let program = self.program.display().to_string();
        let output = tessel_util::process::run_command(&mut cmd).map_err(|e| match e {
            UtilError::CommandExec { source } if source.kind() == std::io::ErrorKind::NotFound => {
                CompilerError::NotFound { program }
            }
            UtilError::CommandExec { source } => CompilerError::Exec { program, source },
            other => CompilerError::Util(other),
        })?;

        let mut diagnostics = parse_diagnostics(&output.stderr);
        diagnostics.extend(parse_diagnostics(&output.stdout));

        Ok(CompilationResult {
            success: output.success,
            diagnostics,
            raw_stdout: output.stdout,
            raw_stderr: output.stderr,
        })
    }
}
