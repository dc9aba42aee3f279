// ==============================================================================
// commands.rs - Coloc Command Expansion
// ==============================================================================
// Description: Turns manifest jobs into wrapper invocations, split into todo
//              and done streams by whether the job output already exists
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::ffi::OsString;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::ExpanderConfig;
use crate::models::{JobDescriptor, JobSide};
use crate::parsers::{ManifestParseError, ManifestReader};
use crate::report::{CommandCounts, RunKind, RunReport};
use crate::validator::validate_file;

/// Resolve `path` against `base` and normalize it lexically.
///
/// `.` is dropped and `..` pops a component; symlinks are not followed and
/// the path need not exist.
pub fn absolutize(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// A fully expanded wrapper invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationDescriptor {
    pub args: Vec<String>,
    /// The job output existed when the job was classified
    pub already_done: bool,
}

impl InvocationDescriptor {
    pub fn command_line(&self) -> String {
        self.args.join(" ")
    }
}

impl fmt::Display for InvocationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Builds invocations with fixed flag order from a run configuration
pub struct CommandBuilder<'a> {
    config: &'a ExpanderConfig,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(config: &'a ExpanderConfig) -> Self {
        Self { config }
    }

    fn abs(&self, path: impl AsRef<Path>) -> String {
        absolutize(&self.config.working_dir, path.as_ref())
            .to_string_lossy()
            .into_owned()
    }

    fn push_side(&self, args: &mut Vec<String>, prefix: &str, side: &JobSide) {
        let mut flag = |name: &str, value: String| {
            args.push(format!("--{}_{}", prefix, name));
            args.push(value);
        };

        flag("sumstat", self.abs(&side.sumstats));
        flag("ld", self.abs(&side.ld));
        flag("type", side.dataset_type.clone());
        flag("study", side.study_id.clone());
        flag("phenotype", side.phenotype_id.clone());
        flag("bio_feature", side.bio_feature.clone());
        flag("chrom", side.lead_chrom.clone());
        flag("pos", side.lead_pos.clone());
        flag("ref", side.lead_ref.clone());
        flag("alt", side.lead_alt.clone());
    }

    /// Expand one job and classify it with a single existence check on its
    /// output path
    pub fn build(&self, job: &JobDescriptor) -> Result<InvocationDescriptor> {
        let config = self.config;
        let out = self.abs(&job.out);

        let mut args = vec![config.interpreter.clone(), self.abs(&config.wrapper_script)];
        self.push_side(&mut args, "left", &job.left);
        self.push_side(&mut args, "right", &job.right);

        args.extend([
            "--r_coloc_script".to_string(),
            self.abs(&config.r_script),
            "--method".to_string(),
            job.method.clone(),
            "--top_loci".to_string(),
            self.abs(&config.top_loci_template),
            "--window_coloc".to_string(),
            config.window_coloc_kb.to_string(),
            "--window_cond".to_string(),
            config.window_cond_kb.to_string(),
            "--min_maf".to_string(),
            format!("{:?}", config.min_maf),
            "--out".to_string(),
            out.clone(),
            "--log".to_string(),
            self.abs(&job.log),
            "--tmpdir".to_string(),
            self.abs(&job.tmpdir),
            "--delete_tmpdir".to_string(),
        ]);

        if config.make_plots {
            let plot = job
                .plot
                .as_ref()
                .with_context(|| format!("Plotting is enabled but job {} has no plot path", job.out))?;
            args.push("--plot".to_string());
            args.push(self.abs(plot));
        }

        Ok(InvocationDescriptor {
            args,
            already_done: Path::new(&out).exists(),
        })
    }
}

/// Expand a stream of jobs into the todo and done sinks, in manifest order
///
/// # Arguments
/// * `jobs` - Parsed manifest entries
/// * `echo` - Console sink for todo commands, flushed per line
pub fn expand<I, T, D>(
    jobs: I,
    builder: &CommandBuilder<'_>,
    todo: &mut T,
    done: &mut D,
    mut echo: Option<&mut dyn Write>,
) -> Result<CommandCounts>
where
    I: IntoIterator<Item = Result<JobDescriptor, ManifestParseError>>,
    T: Write,
    D: Write,
{
    let mut counts = CommandCounts::default();

    for job in jobs {
        let job = job.context("Failed to parse manifest")?;
        let invocation = builder.build(&job)?;

        if invocation.already_done {
            writeln!(done, "{}", invocation)?;
            counts.done += 1;
            continue;
        }

        writeln!(todo, "{}", invocation)?;
        counts.todo += 1;
        if let Some(console) = echo.as_mut() {
            writeln!(console, "{}", invocation)?;
            console.flush()?;
        }
    }

    Ok(counts)
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".partial");
    PathBuf::from(name)
}

fn gz_writer(path: &Path) -> Result<BufWriter<GzEncoder<File>>> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(BufWriter::new(GzEncoder::new(file, Compression::default())))
}

fn finish_gz(writer: BufWriter<GzEncoder<File>>) -> Result<()> {
    writer
        .into_inner()
        .map_err(|e| e.into_error())
        .context("Failed to flush command file")?
        .finish()
        .context("Failed to finish gzip stream")?;
    Ok(())
}

/// Read a manifest and write the gzip todo and done command files.
///
/// Both files are staged next to their targets and only renamed into place
/// once the whole manifest has been expanded.
pub fn make_commands(
    manifest: &Path,
    todo_path: &Path,
    done_path: &Path,
    config: &ExpanderConfig,
    quiet: bool,
) -> Result<RunReport> {
    config.validate()?;

    let settings = serde_json::to_value(config).context("Failed to serialize settings")?;
    let mut report = RunReport::new(RunKind::MakeCommands, settings);
    report.inputs.push(validate_file(manifest)?);

    info!("Expanding manifest {:?}", manifest);
    let jobs = ManifestReader::open(manifest)
        .with_context(|| format!("Failed to open manifest {}", manifest.display()))?;

    let staged_todo = partial_path(todo_path);
    let staged_done = partial_path(done_path);
    let mut todo = gz_writer(&staged_todo)?;
    let mut done = gz_writer(&staged_done)?;

    let stdout = std::io::stdout();
    let mut console = stdout.lock();
    let echo: Option<&mut dyn Write> = if quiet { None } else { Some(&mut console) };

    let builder = CommandBuilder::new(config);
    let expanded = expand(jobs, &builder, &mut todo, &mut done, echo)
        .and_then(|counts| {
            finish_gz(todo)?;
            finish_gz(done)?;
            Ok(counts)
        });

    let counts = match expanded {
        Ok(counts) => counts,
        Err(e) => {
            for staged in [&staged_todo, &staged_done] {
                if let Err(cleanup) = std::fs::remove_file(staged) {
                    warn!("Failed to remove {:?}: {}", staged, cleanup);
                }
            }
            return Err(e);
        }
    };

    std::fs::rename(&staged_todo, todo_path)
        .with_context(|| format!("Failed to write {}", todo_path.display()))?;
    std::fs::rename(&staged_done, done_path)
        .with_context(|| format!("Failed to write {}", done_path.display()))?;
    debug!("Wrote {:?} and {:?}", todo_path, done_path);

    report.outputs = vec![todo_path.to_path_buf(), done_path.to_path_buf()];
    report.commands = Some(counts);
    let report = report.finish();
    report.log();

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::manifest::fixtures::manifest_line;
    use flate2::read::MultiGzDecoder;
    use std::io::{BufRead, BufReader, Cursor};
    use tempfile::tempdir;

    fn config(working_dir: &Path) -> ExpanderConfig {
        ExpanderConfig {
            working_dir: working_dir.to_path_buf(),
            ..Default::default()
        }
    }

    fn jobs(lines: &[String]) -> ManifestReader<Cursor<String>> {
        ManifestReader::new(Cursor::new(lines.join("\n")))
    }

    fn read_gz_lines(path: &Path) -> Vec<String> {
        BufReader::new(MultiGzDecoder::new(File::open(path).unwrap()))
            .lines()
            .map(|l| l.unwrap())
            .collect()
    }

    #[test]
    fn test_absolutize_normalizes_lexically() {
        let base = Path::new("/work/coloc");
        assert_eq!(absolutize(base, Path::new("a/./b")), PathBuf::from("/work/coloc/a/b"));
        assert_eq!(absolutize(base, Path::new("../ld/EUR")), PathBuf::from("/work/ld/EUR"));
        assert_eq!(absolutize(base, Path::new("/abs/x")), PathBuf::from("/abs/x"));
        assert_eq!(absolutize(base, Path::new("/../x")), PathBuf::from("/x"));
    }

    #[test]
    fn test_flag_order() {
        let config = config(Path::new("/work"));
        let job = jobs(&[manifest_line(1, "out/1.json.gz")])
            .next()
            .unwrap()
            .unwrap();

        let invocation = CommandBuilder::new(&config).build(&job).unwrap();
        let flags: Vec<&str> = invocation
            .args
            .iter()
            .filter(|a| a.starts_with("--"))
            .map(String::as_str)
            .collect();

        assert_eq!(
            flags,
            vec![
                "--left_sumstat", "--left_ld", "--left_type", "--left_study",
                "--left_phenotype", "--left_bio_feature", "--left_chrom", "--left_pos",
                "--left_ref", "--left_alt", "--right_sumstat", "--right_ld", "--right_type",
                "--right_study", "--right_phenotype", "--right_bio_feature", "--right_chrom",
                "--right_pos", "--right_ref", "--right_alt", "--r_coloc_script", "--method",
                "--top_loci", "--window_coloc", "--window_cond", "--min_maf", "--out", "--log",
                "--tmpdir", "--delete_tmpdir",
            ]
        );
        assert_eq!(invocation.args[0], "python");
        assert_eq!(invocation.args[1], "/work/scripts/coloc_wrapper.py");

        let line = invocation.command_line();
        assert!(line.contains("--left_sumstat /work/sumstats/gwas/GCST1.parquet"));
        assert!(line.contains("--left_phenotype None"));
        assert!(line.contains("--window_coloc 500 --window_cond 1000 --min_maf 0.01"));
        assert!(line.ends_with("--tmpdir /work/tmp/1 --delete_tmpdir"));
    }

    #[test]
    fn test_plot_flag_when_enabled() {
        let config = ExpanderConfig {
            make_plots: true,
            ..config(Path::new("/work"))
        };
        let job = jobs(&[manifest_line(1, "out/1.json.gz")])
            .next()
            .unwrap()
            .unwrap();

        let line = CommandBuilder::new(&config).build(&job).unwrap().command_line();
        assert!(line.ends_with("--delete_tmpdir --plot /work/plots/1.png"));
    }

    #[test]
    fn test_split_by_existing_output() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("out")).unwrap();
        std::fs::write(dir.path().join("out/2.json.gz"), b"").unwrap();

        let config = config(dir.path());
        let builder = CommandBuilder::new(&config);
        let manifest = [
            manifest_line(1, "out/1.json.gz"),
            manifest_line(2, "out/2.json.gz"),
            manifest_line(3, "out/3.json.gz"),
        ];

        let (mut todo, mut done, mut console) = (Vec::new(), Vec::new(), Vec::new());
        let counts = expand(
            jobs(&manifest),
            &builder,
            &mut todo,
            &mut done,
            Some(&mut console),
        )
        .unwrap();

        assert_eq!(counts, CommandCounts { todo: 2, done: 1 });
        let todo = String::from_utf8(todo).unwrap();
        let done = String::from_utf8(done).unwrap();
        assert_eq!(todo.lines().count(), 2);
        assert!(todo.lines().next().unwrap().contains("--left_study GCST1"));
        assert!(done.contains("--left_study GCST2"));
        assert_eq!(String::from_utf8(console).unwrap(), todo);
    }

    #[test]
    fn test_expansion_is_idempotent() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("out")).unwrap();
        std::fs::write(dir.path().join("out/1.json.gz"), b"").unwrap();

        let config = config(dir.path());
        let builder = CommandBuilder::new(&config);
        let manifest = [manifest_line(1, "out/1.json.gz"), manifest_line(2, "out/2.json.gz")];

        let run = || {
            let (mut todo, mut done) = (Vec::new(), Vec::new());
            expand(jobs(&manifest), &builder, &mut todo, &mut done, None).unwrap();
            (todo, done)
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_make_commands_writes_gzip_streams() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("manifest.json.gz");
        let mut encoder = GzEncoder::new(File::create(&manifest).unwrap(), Compression::default());
        for id in 1..=3 {
            writeln!(encoder, "{}", manifest_line(id, &format!("out/{}.json.gz", id))).unwrap();
        }
        encoder.finish().unwrap();

        let todo = dir.path().join("commands_todo.txt.gz");
        let done = dir.path().join("commands_done.txt.gz");
        let report = make_commands(&manifest, &todo, &done, &config(dir.path()), true).unwrap();

        assert_eq!(report.commands, Some(CommandCounts { todo: 3, done: 0 }));
        assert_eq!(read_gz_lines(&todo).len(), 3);
        assert!(read_gz_lines(&done).is_empty());
        assert!(!partial_path(&todo).exists());
    }

    #[test]
    fn test_bad_manifest_line_writes_nothing() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("manifest.json");
        std::fs::write(
            &manifest,
            format!("{}\nnot json\n", manifest_line(1, "out/1.json.gz")),
        )
        .unwrap();

        let todo = dir.path().join("commands_todo.txt.gz");
        let done = dir.path().join("commands_done.txt.gz");
        let result = make_commands(&manifest, &todo, &done, &config(dir.path()), true);

        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("line 2"));
        assert!(!todo.exists());
        assert!(!partial_path(&todo).exists());

        let mut leftovers = String::new();
        for entry in std::fs::read_dir(dir.path()).unwrap() {
            leftovers.push_str(&entry.unwrap().file_name().to_string_lossy());
        }
        assert_eq!(leftovers, "manifest.json");
    }
}
