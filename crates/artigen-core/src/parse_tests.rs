//! Unit tests for the complete-response parsers.

use super::*;

fn svg_content(parsed: &ParsedResponse) -> Option<&str> {
    match &parsed.payload {
        Some(ArtifactPayload::Svg { content }) => Some(content),
        _ => None,
    }
}

#[cfg(test)]
mod svg_tests {
    use super::*;

    #[test]
    fn splits_prose_around_fenced_svg() {
        let text = "Here is your canvas\n```svg\n<svg><rect/></svg>\n```\nDone";
        let parsed = parse_response(ArtifactKind::Svg, text);
        assert_eq!(svg_content(&parsed), Some("<svg><rect/></svg>"));
        assert_eq!(parsed.before_text, "Here is your canvas");
        assert_eq!(parsed.after_text, "Done");
    }

    #[test]
    fn accepts_untagged_and_xml_fences() {
        for text in [
            "```\n<svg viewBox=\"0 0 1 1\"></svg>\n```",
            "```xml\n<svg viewBox=\"0 0 1 1\"></svg>\n```",
        ] {
            let parsed = parse_response(ArtifactKind::Svg, text);
            assert_eq!(svg_content(&parsed), Some("<svg viewBox=\"0 0 1 1\"></svg>"));
        }
    }

    #[test]
    fn skips_fences_of_other_languages() {
        let text = "```python\nprint('<svg>')\n```\n```svg\n<svg><g/></svg>\n```";
        let parsed = parse_response(ArtifactKind::Svg, text);
        assert_eq!(svg_content(&parsed), Some("<svg><g/></svg>"));
        assert_eq!(parsed.before_text, "```python\nprint('<svg>')\n```");
    }

    #[test]
    fn takes_only_the_first_artifact() {
        let text = "```svg\n<svg id=\"a\"></svg>\n```\nthen\n```svg\n<svg id=\"b\"></svg>\n```";
        let parsed = parse_response(ArtifactKind::Svg, text);
        assert_eq!(svg_content(&parsed), Some("<svg id=\"a\"></svg>"));
        assert!(parsed.after_text.starts_with("then"));
    }

    #[test]
    fn tolerates_missing_closing_fence() {
        let text = "Intro\n```svg\n<svg><circle/></svg>\nOutro";
        let parsed = parse_response(ArtifactKind::Svg, text);
        assert_eq!(svg_content(&parsed), Some("<svg><circle/></svg>"));
        assert_eq!(parsed.before_text, "Intro");
        assert_eq!(parsed.after_text, "Outro");
    }

    #[test]
    fn unclosed_svg_element_is_plain_text() {
        let text = "Here...\n```svg\n<svg><rect/>";
        let parsed = parse_response(ArtifactKind::Svg, text);
        assert!(parsed.payload.is_none());
        assert_eq!(parsed.before_text, text.trim());
        assert!(parsed.after_text.is_empty());
    }

    #[test]
    fn nested_svg_is_kept_whole() {
        let text = "```svg\n<svg><svg><rect/></svg><circle/></svg>\n```";
        let parsed = parse_response(ArtifactKind::Svg, text);
        assert_eq!(
            svg_content(&parsed),
            Some("<svg><svg><rect/></svg><circle/></svg>")
        );
    }
}

#[cfg(test)]
mod mermaid_tests {
    use super::*;

    #[test]
    fn extracts_first_closed_block() {
        let text = "Flow:\n```mermaid\ngraph TD\n  A-->B\n```\nAnything else?";
        let parsed = parse_response(ArtifactKind::Mermaid, text);
        assert_eq!(
            parsed.payload,
            Some(ArtifactPayload::Mermaid {
                code: "graph TD\n  A-->B".to_string(),
                rendered_svg: None,
            })
        );
        assert_eq!(parsed.before_text, "Flow:");
        assert_eq!(parsed.after_text, "Anything else?");
    }

    #[test]
    fn unclosed_block_has_no_payload() {
        let parsed = parse_response(ArtifactKind::Mermaid, "```mermaid\ngraph TD\nA-->B");
        assert!(parsed.payload.is_none());
    }

    #[test]
    fn empty_block_has_no_payload() {
        let parsed = parse_response(ArtifactKind::Mermaid, "```mermaid\n\n```");
        assert!(parsed.payload.is_none());
        assert_eq!(parsed.before_text, "```mermaid\n\n```");
    }
}

#[cfg(test)]
mod echarts_tests {
    use super::*;

    #[test]
    fn parses_json_block() {
        let text = "Sales chart:\n```json\n{\"xAxis\": {\"type\": \"category\"}, \"series\": []}\n```";
        let parsed = parse_response(ArtifactKind::EchartsOption, text);
        let Some(ArtifactPayload::EchartsOption {
            option,
            option_text,
        }) = parsed.payload
        else {
            panic!("expected chart payload");
        };
        assert_eq!(option["xAxis"]["type"], "category");
        assert!(option_text.starts_with('{'));
        assert_eq!(parsed.before_text, "Sales chart:");
    }

    #[test]
    fn strips_assignment_and_semicolon() {
        let (option, source) =
            parse_option("option = {\"series\": [{\"type\": \"bar\"}]};").expect("parse");
        assert_eq!(option["series"][0]["type"], "bar");
        assert_eq!(source, "{\"series\": [{\"type\": \"bar\"}]}");
    }

    #[test]
    fn rejects_non_objects_and_script() {
        assert!(parse_option("[1, 2, 3]").is_none());
        assert!(parse_option("console.log({})").is_none());
        assert!(parse_option("{ tooltip: { formatter: function (p) { return p; } } }").is_none());
    }

    #[test]
    fn accepts_object_literal_syntax() {
        let (option, _) = parse_option("{series: [{type: \"line\"}]}").expect("unquoted keys");
        assert_eq!(option["series"][0]["type"], "line");

        let (option, _) = parse_option("{ title: { text: 'Sales' } }").expect("single quotes");
        assert_eq!(option["title"]["text"], "Sales");

        let (option, _) =
            parse_option("{ \"series\": [{ \"data\": [1, 2], }], }").expect("trailing commas");
        assert_eq!(option["series"][0]["data"][1].as_f64(), Some(2.0));
    }

    #[test]
    fn javascript_reply_becomes_chart() {
        let text = "Chart:\n```javascript\noption = {\n  title: { text: 'Sales' },\n  xAxis: { type: 'category', data: ['Q1', 'Q2'] },\n  series: [{ type: 'bar', data: [1, 2], }],\n};\n```\nDone";
        let parsed = parse_response(ArtifactKind::EchartsOption, text);
        let Some(ArtifactPayload::EchartsOption { option, option_text }) = parsed.payload else {
            panic!("expected chart payload");
        };
        assert_eq!(option["series"][0]["type"], "bar");
        assert_eq!(option["xAxis"]["data"][1], "Q2");
        assert!(option_text.starts_with('{') && option_text.ends_with('}'));
        assert_eq!(parsed.before_text, "Chart:");
        assert_eq!(parsed.after_text, "Done");
    }

    #[test]
    fn skips_invalid_block_for_later_valid_one() {
        let text = "```js\nconst x = 1;\n```\n```json\n{\"series\": []}\n```";
        let parsed = parse_response(ArtifactKind::EchartsOption, text);
        assert!(matches!(
            parsed.payload,
            Some(ArtifactPayload::EchartsOption { .. })
        ));
        assert_eq!(parsed.before_text, "```js\nconst x = 1;\n```");
    }

    #[test]
    fn unclosed_option_has_no_payload() {
        let parsed = parse_response(ArtifactKind::EchartsOption, "```json\n{\"series\": [");
        assert!(parsed.payload.is_none());
    }
}

#[cfg(test)]
mod html_tests {
    use super::*;

    fn html_content(parsed: &ParsedResponse) -> Option<&str> {
        match &parsed.payload {
            Some(ArtifactPayload::Html { content }) => Some(content),
            _ => None,
        }
    }

    #[test]
    fn closed_html_block() {
        let text = "Your page:\n```html\n<!DOCTYPE html><html><body>Hi</body></html>\n```\nEnjoy";
        let parsed = parse_response(ArtifactKind::Html, text);
        assert_eq!(
            html_content(&parsed),
            Some("<!DOCTYPE html><html><body>Hi</body></html>")
        );
        assert_eq!(parsed.before_text, "Your page:");
        assert_eq!(parsed.after_text, "Enjoy");
    }

    #[test]
    fn unclosed_html_fence_runs_to_end() {
        let text = "Page:\n```html\n<html><body>Hi</body></html>\n``";
        let parsed = parse_response(ArtifactKind::Html, text);
        assert_eq!(html_content(&parsed), Some("<html><body>Hi</body></html>"));
        assert!(parsed.after_text.is_empty());
    }

    #[test]
    fn bare_document_is_found() {
        let text = "Sure thing.\n<!DOCTYPE html>\n<html><body>Hi</body></html>";
        let parsed = parse_response(ArtifactKind::Html, text);
        assert_eq!(
            html_content(&parsed),
            Some("<!DOCTYPE html>\n<html><body>Hi</body></html>")
        );
        assert_eq!(parsed.before_text, "Sure thing.");
    }

    #[test]
    fn empty_fence_residue_is_removed_from_prose() {
        let text = "```html\n```\nIntro\n```html\n<p>Hi</p>\n```\n```\nBye";
        let parsed = parse_response(ArtifactKind::Html, text);
        assert_eq!(html_content(&parsed), Some("<p>Hi</p>"));
        assert_eq!(parsed.before_text, "Intro");
        assert_eq!(parsed.after_text, "Bye");
    }

    #[test]
    fn prose_only_has_no_payload() {
        let parsed = parse_response(ArtifactKind::Html, "  I cannot build that page.  ");
        assert!(parsed.payload.is_none());
        assert_eq!(parsed.before_text, "I cannot build that page.");
    }
}
