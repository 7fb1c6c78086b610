use crate::{
    evaluator::{evaluate, Strictness, Verdict},
    executor::{execute_descriptor, Exchange, ExecutionContext, ExecutionError},
    report::{Outcome, RunReport, TestRecord},
    suite::{EndpointDescriptor, Suite},
};

/// Runs every descriptor once, in order, and hands each record to `on_record`
/// as soon as it is judged.
pub async fn run_suite(
    context: &ExecutionContext,
    suite: &Suite,
    mut on_record: impl FnMut(&TestRecord),
) -> RunReport {
    let mut report = RunReport::new(
        context.base_url.as_str(),
        context.strictness,
        context.credentials.availability(),
    );

    for descriptor in suite.endpoints() {
        let result = execute_descriptor(context, descriptor).await;
        let record = judge(descriptor, result, context.strictness);
        on_record(&record);
        report.push(record);
    }

    tracing::info!(
        passed = report.summary.passed,
        failed = report.summary.failed,
        skipped = report.summary.skipped,
        "run finished"
    );
    report
}

/// Turns an execution result into a record. Depends only on its arguments.
pub fn judge(
    descriptor: &EndpointDescriptor,
    result: Result<Exchange, ExecutionError>,
    strictness: Strictness,
) -> TestRecord {
    let mut record = TestRecord {
        name: descriptor.name.clone(),
        group: descriptor.group.clone(),
        method: descriptor.method.clone(),
        path: descriptor.path_template.clone(),
        auth: descriptor.auth,
        outcome: Outcome::Skipped,
        status: None,
        content_type: None,
        duration_ms: None,
        message: None,
    };

    match result {
        Err(err) => {
            record.outcome = if err.is_skip() {
                Outcome::Skipped
            } else {
                tracing::warn!(name = %descriptor.name, error = %err, "test failed");
                Outcome::Failed
            };
            record.message = Some(err.to_string());
        }
        Ok(exchange) => {
            record.status = Some(exchange.status);
            record.content_type = exchange.content_type().map(str::to_string);
            record.duration_ms = Some(exchange.duration.as_secs_f64() * 1000.0);
            match evaluate(&descriptor.expected, &exchange.observation(), strictness) {
                Verdict::Pass { warning } => {
                    record.outcome = Outcome::Passed;
                    record.message = warning;
                }
                Verdict::Fail { message } => {
                    record.outcome = Outcome::Failed;
                    record.message = Some(message);
                }
            }
        }
    }
    record
}
