//! Per-cell artifact dumps for triage.
//!
//! Layout, one directory level per matrix axis:
//!
//! ```text
//! DIR/README.md
//! DIR/<toolchain>/README.md
//! DIR/<toolchain>/<scenario>/<fixture-id>.src.<ext>
//! DIR/<toolchain>/<scenario>/<fixture-id>.flags
//! DIR/<toolchain>/<scenario>/<fixture-id>.asm
//! DIR/<toolchain>/<scenario>/<fixture-id>.diag
//! ```
//!
//! Only the collecting thread writes here, so no locking is needed.

use crate::annotation::FixtureCase;
use crate::config::path_component_problem;
use crate::matrix::{OptimizationScenario, ToolchainProfile};
use crate::verify::{Verdict, VerificationResult};
use log::debug;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct ArtifactWriter {
    root: PathBuf,
    written: usize,
}

impl ArtifactWriter {
    pub fn create(root: &Path) -> io::Result<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            written: 0,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of cells dumped so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Dump one attempted cell. Skipped cells are ignored.
    pub fn record(&mut self, fixture: &FixtureCase, result: &VerificationResult) -> io::Result<()> {
        if result.verdict == Verdict::Skip {
            return Ok(());
        }
        let mut base = self.root.clone();
        for component in [result.toolchain.as_str(), result.scenario.as_str()]
            .into_iter()
            .chain(fixture.id.split('/'))
        {
            if let Some(reason) = path_component_problem(component) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("refusing artifact path component `{component}`: {reason}"),
                ));
            }
            base.push(component);
        }
        if let Some(parent) = base.parent() {
            fs::create_dir_all(parent)?;
        }
        let with_suffix = |suffix: &str| {
            let mut path = base.clone().into_os_string();
            path.push(suffix);
            PathBuf::from(path)
        };

        fs::write(with_suffix(&format!(".src{}", fixture.extension)), &fixture.source)?;
        fs::write(with_suffix(".flags"), format!("{}\n", result.flags.join(" ")))?;
        if !result.listing.is_empty() {
            let mut asm = String::new();
            for inst in &result.listing {
                match inst.address {
                    Some(address) => writeln!(asm, "{address:8x}:\t{inst}"),
                    None => writeln!(asm, "\t{inst}"),
                }
                .map_err(io::Error::other)?;
            }
            fs::write(with_suffix(".asm"), asm)?;
        }
        if let Some(failure) = &result.failure {
            fs::write(with_suffix(".diag"), format!("{}\n", failure.message))?;
        }
        self.written += 1;
        debug!("Dumped {} to {}", fixture.id, base.display());
        Ok(())
    }

    /// Write the README index files and return the root.
    pub fn finish(
        self,
        toolchains: &[ToolchainProfile],
        scenarios: &[OptimizationScenario],
    ) -> io::Result<PathBuf> {
        let mut top = String::from("# Gallery run artifacts\n\n## Scenarios\n\n");
        for scenario in scenarios {
            top.push_str(&format!("- **{}**\n", scenario.label));
        }
        top.push_str("\n## Toolchains\n\n| Toolchain | Family | Version | Arch |\n|---|---|---|---|\n");
        for toolchain in toolchains {
            top.push_str(&format!(
                "| [{id}](./{id}/README.md) | {} | {} | {} |\n",
                toolchain.family,
                toolchain.version,
                toolchain.arch,
                id = toolchain.id
            ));

            let mut page = format!(
                "# {}\n\n## Scenarios\n\n| Scenario | Flags | Link |\n|---|---|---|\n",
                toolchain.id
            );
            for scenario in scenarios {
                let flags = toolchain
                    .baseline(&scenario.label)
                    .map(|flags| flags.join(" "))
                    .unwrap_or_default();
                page.push_str(&format!(
                    "| `{label}` | `{flags}` | [{label}](./{label}/) |\n",
                    label = scenario.label
                ));
            }
            let dir = self.root.join(&toolchain.id);
            fs::create_dir_all(&dir)?;
            fs::write(dir.join("README.md"), page)?;
        }
        fs::write(self.root.join("README.md"), top)?;
        Ok(self.root)
    }
}
