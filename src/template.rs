use crate::spawner::sources::WorkItem;
use tera::{Context, Tera};

/// Variables exposed to prompt and branch templates. The set is fixed:
/// referencing anything else is a render error and the work item is
/// skipped for the cycle.
fn work_item_context(item: &WorkItem) -> Context {
    let mut context = Context::new();
    context.insert("id", &item.id);
    context.insert("number", &item.number);
    context.insert("title", &item.title);
    context.insert("body", &item.body);
    context.insert("url", &item.url);
    context.insert("labels", &item.labels);
    context.insert("comments", &item.comments);
    context.insert("kind", &item.kind.to_string());
    context.insert("time", &item.time);
    context.insert("schedule", &item.schedule);
    context
}

/// Render a one-off template (prompt or branch) over a work item.
pub fn render_work_item_template(template: &str, item: &WorkItem) -> Result<String, tera::Error> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline", template)?;
    tera.render("inline", &work_item_context(item))
}

/// Flatten a tera error chain into one line usable in a status message.
pub fn render_error_message(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawner::sources::{WorkItem, WorkItemKind};

    fn item() -> WorkItem {
        WorkItem {
            id: "42".to_string(),
            number: 42,
            title: "Fix flaky retry logic".to_string(),
            body: "See stack trace in CI".to_string(),
            url: "https://github.com/ex/r/issues/42".to_string(),
            labels: vec!["bug".to_string(), "p1".to_string()],
            comments: String::new(),
            kind: WorkItemKind::Issue,
            time: "2026-07-01T10:00:00Z".to_string(),
            schedule: String::new(),
            trigger_time: None,
        }
    }

    #[test]
    fn renders_prompt_with_title_and_url() {
        // given
        let template = "Work on issue #{{ number }}: {{ title }}\n{{ url }}";

        // when
        let rendered = render_work_item_template(template, &item()).unwrap();

        // then
        assert_eq!(
            rendered,
            "Work on issue #42: Fix flaky retry logic\nhttps://github.com/ex/r/issues/42"
        );
    }

    #[test]
    fn renders_branch_from_id() {
        let rendered = render_work_item_template("kelos/issue-{{ id }}", &item()).unwrap();
        assert_eq!(rendered, "kelos/issue-42");
    }

    #[test]
    fn labels_are_iterable() {
        let rendered =
            render_work_item_template("{% for l in labels %}{{ l }} {% endfor %}", &item()).unwrap();
        assert_eq!(rendered, "bug p1 ");
    }

    #[test]
    fn unknown_variable_is_an_error() {
        let err = render_work_item_template("{{ assignee }}", &item()).unwrap_err();
        assert!(!render_error_message(&err).is_empty());
    }
}
