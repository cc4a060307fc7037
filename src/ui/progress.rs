use crate::checkpoint::StageObserver;
use crate::pipeline::state::RunSnapshot;
use crate::ui::icons::{CHECK, CROSS, FILE_NEW, RESUME, SKIP, SPARKLE, WARN};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

/// Terminal UI for a generation run, rendered via `indicatif` progress bars.
///
/// Two bars are stacked vertically:
/// - Stage bar: how many pipeline stages have finished (the `.env` step counts)
/// - Item bar: position in the work-item loop of the generate stage
///
/// Stage transitions arrive through [`StageObserver`], so memoized skips
/// are shown the same way as freshly run stages.
pub struct GeneratorUI {
    multi: MultiProgress,
    stage_bar: ProgressBar,
    item_bar: ProgressBar,
    verbose: bool,
}

impl GeneratorUI {
    pub fn new(verbose: bool) -> Self {
        let multi = MultiProgress::new();
        let stage_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let stage_bar = multi.add(ProgressBar::new(5));
        stage_bar.set_style(stage_style);
        stage_bar.set_prefix("Stages");

        let item_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} {spinner} [{bar:30.green/white}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("=> ");

        let item_bar = multi.add(ProgressBar::new(0));
        item_bar.set_style(item_style);
        item_bar.set_prefix(" Items");

        Self {
            multi,
            stage_bar,
            item_bar,
            verbose,
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    pub fn print_header(&self, definition: &str, destination: &Path, namespace: &str) {
        self.print_line("");
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
        self.print_line(format!(
            "{} Generating from {}",
            style("▶").green().bold(),
            style(definition).yellow().bold()
        ));
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
        self.print_line(format!(
            "{}  {}",
            style("Destination:").dim(),
            destination.display()
        ));
        self.print_line(format!("{}    {}", style("Namespace:").dim(), namespace));
        self.print_line("");
    }

    pub fn show_resumed(&self, snapshot: &RunSnapshot) {
        self.print_line(format!(
            "{}Resuming from '{}' ({} models, {} tests so far)",
            RESUME,
            style(snapshot.state).yellow(),
            snapshot.models_count,
            snapshot.tests_count
        ));
    }

    /// Size the item bar for the generate loop; `done` items were restored.
    pub fn start_items(&self, total: usize, done: usize) {
        self.item_bar.set_length(total as u64);
        self.item_bar.set_position(done as u64);
        self.item_bar.enable_steady_tick(Duration::from_millis(100));
    }

    pub fn start_item(&self, label: &str) {
        self.item_bar.set_message(style(label).yellow().to_string());
    }

    pub fn item_done(&self, label: &str, files: usize, passed: bool) {
        self.item_bar.inc(1);
        let icon = if passed { CHECK } else { WARN };
        self.print_line(format!(
            "  {}{} {}",
            icon,
            label,
            style(format!("({} files)", files)).dim()
        ));
    }

    pub fn finish_items(&self) {
        self.item_bar.finish_and_clear();
    }

    pub fn show_files(&self, paths: &[String]) {
        if !self.verbose {
            return;
        }
        for path in paths {
            self.print_line(format!("    {}{}", FILE_NEW, style(path).dim()));
        }
    }

    pub fn show_warning(&self, msg: &str) {
        self.print_line(format!("{}{}", WARN, style(msg).yellow()));
    }

    pub fn run_complete(&self, snapshot: &RunSnapshot, checks_passed: bool) {
        self.stage_bar.finish_and_clear();
        let checks = if checks_passed {
            style("passed").green().to_string()
        } else {
            style("failed").red().to_string()
        };
        self.print_line(format!(
            "\n{} Generation complete: {} models, {} tests, final checks {}\n",
            SPARKLE,
            style(snapshot.models_count).green().bold(),
            style(snapshot.tests_count).green().bold(),
            checks
        ));
    }

    pub fn run_failed(&self, reason: &str) {
        self.stage_bar.abandon();
        self.item_bar.abandon();
        self.print_line(format!(
            "\n{} Generation failed: {}\n{}",
            CROSS,
            reason,
            style("Progress was saved; rerun the same command to resume.").dim()
        ));
    }
}

impl StageObserver for GeneratorUI {
    fn stage_started(&self, stage: &str) {
        self.stage_bar
            .set_message(format!("{}", style(stage).yellow()));
    }

    fn stage_skipped(&self, stage: &str) {
        self.stage_bar.inc(1);
        self.print_line(format!(
            "{}{} {}",
            SKIP,
            style(stage).dim(),
            style("(already completed)").dim()
        ));
    }

    fn stage_completed(&self, stage: &str) {
        self.stage_bar.inc(1);
        self.print_line(format!("{}{}", CHECK, style(stage).green()));
    }
}
