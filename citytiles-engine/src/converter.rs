use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

/// 外部转换失败时捕获的诊断输出。
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionFailure {
    pub diagnostics: String,
}

impl ConversionFailure {
    pub fn new(diagnostics: impl Into<String>) -> Self {
        Self {
            diagnostics: diagnostics.into(),
        }
    }
}

/// 网格格式转换能力。实现可以是同步子进程，也可以替换为排队/异步实现，
/// 合并流程只依赖该接口。
pub trait MeshConverter {
    fn convert(&self, input: &Path, output: &Path) -> Result<(), ConversionFailure>;
}

/// 以 `<program> --input <in> --output <out>` 调用外部转换器，阻塞至子进程退出。
/// 不设超时：转换器挂起会导致整个流程挂起。
#[derive(Debug, Clone)]
pub struct ProcessConverter {
    program: PathBuf,
    extra_args: Vec<String>,
}

impl ProcessConverter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    #[inline]
    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl MeshConverter for ProcessConverter {
    fn convert(&self, input: &Path, output: &Path) -> Result<(), ConversionFailure> {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                ConversionFailure::new(format!(
                    "cannot create output directory {}: {err}",
                    parent.display()
                ))
            })?;
        }

        debug!(
            program = %self.program.display(),
            input = %input.display(),
            output = %output.display(),
            "启动网格转换器"
        );
        let result = Command::new(&self.program)
            .args(&self.extra_args)
            .arg("--input")
            .arg(input)
            .arg("--output")
            .arg(output)
            .output()
            .map_err(|err| {
                ConversionFailure::new(format!(
                    "failed to launch {}: {err}",
                    self.program.display()
                ))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&result.stdout).trim().to_string();
            let detail = if stderr.is_empty() { stdout } else { stderr };
            return Err(ConversionFailure::new(format!(
                "{} exited with {}: {detail}",
                self.program.display(),
                result.status
            )));
        }
        if !output.exists() {
            return Err(ConversionFailure::new(format!(
                "{} reported success but produced no {}",
                self.program.display(),
                output.display()
            )));
        }

        info!(output = %output.display(), "网格转换完成");
        Ok(())
    }
}
