use colored::Colorize;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, Color, Table};

use crate::runner::plan::TestPlan;
use crate::runner::types::{
    IterationReport, RequestOutcome, TestCaseReport, TestCaseState, TestSummary,
};

pub struct TestReporter {
    verbose: bool,
}

impl TestReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Print the run banner
    pub fn print_header(&self, test_cases: usize, worker: usize, iterations: u64) {
        println!(
            "\nRunning {} test cases as worker {} for {} iteration(s)...\n",
            test_cases,
            worker.to_string().bold(),
            iterations
        );
    }

    pub fn print_iteration(&self, report: &IterationReport) {
        println!("{}", format!("Iteration {}", report.iteration).bold());
        for test_case in &report.test_cases {
            self.print_test_case(test_case);
        }
        if report.aborted {
            println!(" {} {}", "⊘".dimmed(), "(run stopped)".dimmed());
        }
        println!();
    }

    pub fn print_test_case(&self, report: &TestCaseReport) {
        let symbol = if report.passed() {
            "✓".green()
        } else {
            "✗".red()
        };
        println!(
            " {} [{}] {} ({}ms)",
            symbol,
            report.number,
            report.name.bold(),
            report.duration().as_millis()
        );

        for outcome in &report.requests {
            self.print_request(outcome);
        }

        if report.state == TestCaseState::Failed
            && let Some(error) = &report.error
        {
            println!("   {}: {}", "Error".red().bold(), error);
        }
    }

    fn print_request(&self, outcome: &RequestOutcome) {
        let symbol = if outcome.success {
            "✓".green()
        } else {
            "✗".red()
        };
        let status = match outcome.status {
            Some(code) if code >= 400 => code.to_string().red(),
            Some(code) => code.to_string().green(),
            None => "---".dimmed(),
        };
        println!(
            "   {} [{}] {} {} {} ({}ms)",
            symbol,
            outcome.number,
            outcome.method.to_string().cyan(),
            outcome.url,
            status,
            outcome.duration.as_millis()
        );

        if self.verbose {
            if !outcome.description.is_empty() {
                println!("       {}", outcome.description.dimmed());
            }
            for (name, value) in &outcome.captured {
                println!("       {} {} = {}", "captured".dimmed(), name, value);
            }
        }

        for hint in &outcome.correlations {
            if hint.found_in.is_empty() {
                println!(
                    "       {} {} not found in earlier responses",
                    "correlate".yellow(),
                    hint.parameter
                );
            } else {
                let found: Vec<String> = hint.found_in.iter().map(u32::to_string).collect();
                println!(
                    "       {} {} found in {}",
                    "correlate".yellow(),
                    hint.parameter,
                    found.join(", ")
                );
            }
        }
    }

    /// Print the run summary
    pub fn print_summary(&self, summary: &TestSummary) {
        println!("\n{}", "━".repeat(50));
        println!("{}", "Summary".bold());
        println!("{}", "━".repeat(50));

        println!("  {}: {}", "Iterations".bold(), summary.iterations);
        if summary.failed == 0 {
            println!(
                "  {}: {} passed, {} total",
                "Test cases".bold(),
                summary.passed.to_string().green(),
                summary.test_cases
            );
        } else {
            println!(
                "  {}: {} passed, {} failed, {} total",
                "Test cases".bold(),
                summary.passed.to_string().green(),
                summary.failed.to_string().red(),
                summary.test_cases
            );
        }

        if summary.failed_requests == 0 {
            println!("  {}: {} total", "Requests".bold(), summary.requests);
        } else {
            println!(
                "  {}: {} failed, {} total",
                "Requests".bold(),
                summary.failed_requests.to_string().red(),
                summary.requests
            );
        }

        println!(
            "  {}: {:.3}s",
            "Duration".bold(),
            summary.total_duration.as_secs_f64()
        );
        println!();
    }

    /// Table of every numbered request in a plan.
    pub fn print_plan(&self, plan: &TestPlan) {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_header(vec!["#", "Test case", "Method", "URL", "Captures"]);

        for test_case in plan.test_cases() {
            for request in &test_case.requests {
                let captures: Vec<&str> = request.captures.iter().map(|c| c.name.as_str()).collect();
                table.add_row(vec![
                    Cell::new(request.number),
                    Cell::new(&test_case.name),
                    Cell::new(request.template.method).fg(Color::Cyan),
                    Cell::new(&request.template.url).add_attribute(Attribute::Dim),
                    Cell::new(captures.join(", ")),
                ]);
            }
        }

        println!("{}", table);
    }
}

impl Default for TestReporter {
    fn default() -> Self {
        Self::new(false)
    }
}
