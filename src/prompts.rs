//! Prompt assembly for the repair conversation.
//!
//! Every conversation starts from a fixed three-message few-shot history
//! (instruction, worked example input, worked example output) and ends with
//! a user query for the bug at hand. Breadth and refinement rounds prepend
//! guidance that folds earlier attempts and their verdicts into the query.
//!
//! The template texts are load-bearing: downstream extraction keys on the
//! `// Fixed Method X` convention they establish, so they are kept verbatim
//! including their line breaks and spacing.

use clap::ValueEnum;

use crate::dataset::MethodSample;
use crate::llm::ChatMessage;
use crate::traces::{read_debug_info, read_method_calls, TraceFiles};

/// Which context accompanies the buggy code in the user query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PromptMode {
    /// Buggy methods plus execution traces and callee context.
    #[value(name = "debuginfo")]
    DebugInfo,
    /// Buggy methods only.
    Pure,
    /// Buggy methods plus the failing run's exception message.
    Exception,
}

impl PromptMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptMode::DebugInfo => "debuginfo",
            PromptMode::Pure => "pure",
            PromptMode::Exception => "exception",
        }
    }
}

const DEBUG_INSTRUCTION: &str = r#"As an AI debugger, your duty is to generate a refined version of each buggy function for the 
provided bug report. For each buggy function, provide a fixed version. Output only the fixed functions in a single 
code block, with each function preceded by a comment `// Fixed Method X` (where X is the method number). Do not 
include any other text or explanations. "#;

const PURE_INSTRUCTION: &str = r#"As an AI debugger, your duty is to generate a refined version for each buggy function. Do not 
response anything else except the refined version of buggy function. "#;

const EXCEPTION_INSTRUCTION: &str = r#"As an AI debugger, your duty is to generate a refined version for each buggy function 
based on the provided buggy code and exception information. Do not respond with anything else except the refined 
version of the buggy function. "#;

const DEBUG_QUERY: &str = r#"### Buggy Java Functions (please generate fixed versions for each):
```java```
{BUGGY_CODE}

Debugging Information (e.g., Local Variables, Control Flow, Method Call):
- Local Variables: Shows values of variables at specific lines.
- Control Flow: Displays conditions and whether they were true/false.
- Method Call: Logs method invocations and call stack.
{DEBUG_INFO}

Function Call Context:
This section provides details of the methods being invoked in the current execution flow, including:
- Method Name: The name of the method being called.
- Comment: The comments or documentation describing the method's purpose and behavior.
- Source Code: The actual code of the method, or a note if the method body is not provided.
{CALL_INFO}

Please provide the fixed versions of all buggy functions in a single code block, with each fixed function preceded by 
a comment `// Fixed Method X` (where X is the method number starting from 1). "#;

const PURE_QUERY: &str = r#"
```java```
{BUGGY_CODE}

Please provide the fixed versions of all buggy functions in a single code block, with each fixed function preceded by a comment `// Fixed Method X` (where X is the method number starting from 1).
"#;

const EXCEPTION_QUERY: &str = r#"
```java```
{BUGGY_CODE}
Exception Information:
{EXCEPTION_INFO}

Please provide the fixed versions of all buggy functions in a single code block, with each fixed function preceded by a comment `// Fixed Method X` (where X is the method number starting from 1).
"#;

const EXAMPLE_INPUT_DEBUG: &str = r#"### Buggy Java Functions (please generate fixed versions for each):
```java```
// Method 1
public Vector3D intersection(final SubLine subLine, final boolean includeEndPoints) {
    // compute the intersection on infinite line
    Vector3D v1D = line.intersection(subLine.line);
    // check location of point with respect to first sub-line
    Location loc1 = remainingRegion.checkPoint(line.toSubSpace(v1D));
    // check location of point with respect to second sub-line
    Location loc2 = subLine.remainingRegion.checkPoint(subLine.line.toSubSpace(v1D));
    if (includeEndPoints) {
        return ((loc1 != Location.OUTSIDE) && (loc2 != Location.OUTSIDE)) ? v1D : null;
    } else {
        return ((loc1 == Location.INSIDE) && (loc2 == Location.INSIDE)) ? v1D : null;
    }
}

// Method 2
public Vector2D intersection(final SubLine subLine, final boolean includeEndPoints) {
    // retrieve the underlying lines
    Line line1 = (Line) getHyperplane();
    Line line2 = (Line) subLine.getHyperplane();
    // compute the intersection on infinite line
    Vector2D v2D = line1.intersection(line2);
    // check location of point with respect to first sub-line
    Location loc1 = getRemainingRegion().checkPoint(line1.toSubSpace(v2D));
    // check location of point with respect to second sub-line
    Location loc2 = subLine.getRemainingRegion().checkPoint(line2.toSubSpace(v2D));
    if (includeEndPoints) {
        return ((loc1 != Location.OUTSIDE) && (loc2 != Location.OUTSIDE)) ? v2D : null;
    } else {
        return ((loc1 == Location.INSIDE) && (loc2 == Location.INSIDE)) ? v2D : null;
    }
}

Debugging Information (e.g., Local Variables, Control Flow, Method Call):
- Local Variables: Shows values of variables at specific lines.
- Control Flow: Displays conditions and whether they were true/false.
- Method Call: Logs method invocations and call stack.

=== Debug Info for Test: org.apache.commons.math3.geometry.euclidean.threed.SubLineTest::testIntersectionNotIntersecting ===

org.apache.commons.math3.geometry.euclidean.threed.SubLine:intersection:112->[Local Variables] "{subLine=org.apache.commons.math3.geometry.euclidean.threed.SubLine@5e746d37, includeEndPoints=true}"
org.apache.commons.math3.geometry.euclidean.threed.SubLine:intersection:113->[Method Call] Call Stack: org.apache.commons.math3.geometry.euclidean.threed.SubLine.intersection:113 -> org.apache.commons.math3.geometry.euclidean.threed.Line.intersection
org.apache.commons.math3.geometry.euclidean.threed.SubLine:intersection:116->[Method Call] Call Stack: org.apache.commons.math3.geometry.euclidean.threed.SubLine.intersection:116 -> org.apache.commons.math3.geometry.euclidean.threed.Line.toSubSpace

=== Debug Info for Test: org.apache.commons.math3.geometry.euclidean.twod.SubLineTest::testIntersectionParallel ===

org.apache.commons.math3.geometry.euclidean.twod.SubLine:intersection:112->[Local Variables] {"subLine":{"hyperplane":{},"remainingRegion":{}},"includeEndPoints":true}
org.apache.commons.math3.geometry.euclidean.twod.SubLine:intersection:113->[Method Call] Call Stack: org.apache.commons.math3.geometry.euclidean.twod.SubLine.intersection:113 -> org.apache.commons.math3.geometry.euclidean.twod.SubLine.getHyperplane
org.apache.commons.math3.geometry.euclidean.twod.SubLine:intersection:113->[Local Variables] {"line1":{"angle":1.5707963267948966,"cos":6.123233995736766E-17,"sin":1.0,"originOffset":0.0}}
org.apache.commons.math3.geometry.euclidean.twod.SubLine:intersection:114->[Method Call] Call Stack: org.apache.commons.math3.geometry.euclidean.twod.SubLine.intersection:114 -> org.apache.commons.math3.geometry.euclidean.twod.SubLine.getHyperplane
org.apache.commons.math3.geometry.euclidean.twod.SubLine:intersection:116->[Local Variables] {"line2":{"angle":1.5707963267948966,"cos":6.123233995736766E-17,"sin":1.0,"originOffset":-66.0}}
org.apache.commons.math3.geometry.euclidean.twod.SubLine:intersection:117->[Method Call] Call Stack: org.apache.commons.math3.geometry.euclidean.twod.SubLine.intersection:117 -> org.apache.commons.math3.geometry.euclidean.twod.Line.intersection
org.apache.commons.math3.geometry.euclidean.twod.SubLine:intersection:120->[Method Call] Call Stack: org.apache.commons.math3.geometry.euclidean.twod.SubLine.intersection:120 -> org.apache.commons.math3.geometry.euclidean.twod.SubLine.getRemainingRegion
org.apache.commons.math3.geometry.euclidean.twod.SubLine:intersection:120->[Method Call] Call Stack: org.apache.commons.math3.geometry.euclidean.twod.SubLine.intersection:120 -> org.apache.commons.math3.geometry.euclidean.twod.Line.toSubSpace

Function Call Context:
This section provides details of the methods being invoked in the current execution flow, including:
- Method Name: The name of the method being called.
- Comment: The comments or documentation describing the method's purpose and behavior.
- Source Code: The actual code of the method, or a note if the method body is not provided.

Method: org.apache.commons.math3.geometry.euclidean.threed.Line.intersection
Comment:
    /** Get the intersection point of the instance and another line.
     * @param line other line
     * @return intersection point of the instance and the other line
     * or null if there are no intersection points
     */
Source Code:
    public Vector3D intersection(final Line line) {
        final Vector3D closest = closestPoint(line);
        return line.contains(closest) ? closest : null;
    }

Method: org.apache.commons.math3.geometry.euclidean.threed.Line.toSubSpace
Comment:
    /** {@inheritDoc}
     * @see #getAbscissa(Vector3D)
     */
Source Code:
    public Vector1D toSubSpace(final Vector<Euclidean3D> point) {
        return new Vector1D(getAbscissa((Vector3D) point));
    }

Method: org.apache.commons.math3.geometry.euclidean.twod.Line.intersection
Comment:
    /** Get the intersection point of the instance and another line.
     * @param other other line
     * @return intersection point of the instance and the other line
     * or null if there are no intersection points
     */
Source Code:
    public Vector2D intersection(final Line other) {
        final double d = sin * other.cos - other.sin * cos;
        if (FastMath.abs(d) < 1.0e-10) {
            return null;
        }
        return new Vector2D((cos * other.originOffset - other.cos * originOffset) / d,
                            (sin * other.originOffset - other.sin * originOffset) / d);
    }

Method: org.apache.commons.math3.geometry.euclidean.twod.Line.toSubSpace
Comment:
    [No comment]
Source Code:
    [No method body]

Method: org.apache.commons.math3.geometry.euclidean.twod.SubLine.getHyperplane
Comment:
    [No comment]
Source Code:
    [No method body]

Method: org.apache.commons.math3.geometry.euclidean.twod.SubLine.getRemainingRegion
Comment:
    [No comment]
Source Code:
    [No method body]
"#;

const EXAMPLE_INPUT_PURE: &str = r#"
```java```
// Method 1
public Vector3D intersection(final SubLine subLine, final boolean includeEndPoints) {
    // compute the intersection on infinite line
    Vector3D v1D = line.intersection(subLine.line);
    // check location of point with respect to first sub-line
    Location loc1 = remainingRegion.checkPoint(line.toSubSpace(v1D));
    // check location of point with respect to second sub-line
    Location loc2 = subLine.remainingRegion.checkPoint(subLine.line.toSubSpace(v1D));
    if (includeEndPoints) {
        return ((loc1 != Location.OUTSIDE) && (loc2 != Location.OUTSIDE)) ? v1D : null;
    } else {
        return ((loc1 == Location.INSIDE) && (loc2 == Location.INSIDE)) ? v1D : null;
    }
}

// Method 2
public Vector2D intersection(final SubLine subLine, final boolean includeEndPoints) {
    // retrieve the underlying lines
    Line line1 = (Line) getHyperplane();
    Line line2 = (Line) subLine.getHyperplane();
    // compute the intersection on infinite line
    Vector2D v2D = line1.intersection(line2);
    // check location of point with respect to first sub-line
    Location loc1 = getRemainingRegion().checkPoint(line1.toSubSpace(v2D));
    // check location of point with respect to second sub-line
    Location loc2 = subLine.getRemainingRegion().checkPoint(line2.toSubSpace(v2D));
    if (includeEndPoints) {
        return ((loc1 != Location.OUTSIDE) && (loc2 != Location.OUTSIDE)) ? v2D : null;
    } else {
        return ((loc1 == Location.INSIDE) && (loc2 == Location.INSIDE)) ? v2D : null;
    }
}

Please provide the fixed versions of all buggy functions in a single code block, with each fixed function preceded by a comment `// Fixed Method X` (where X is the method number starting from 1).
"#;

const EXAMPLE_INPUT_EXCEPTION: &str = r#"
```java```
// Method 1
public Vector3D intersection(final SubLine subLine, final boolean includeEndPoints) {
    // compute the intersection on infinite line
    Vector3D v1D = line.intersection(subLine.line);
    // check location of point with respect to first sub-line
    Location loc1 = remainingRegion.checkPoint(line.toSubSpace(v1D));
    // check location of point with respect to second sub-line
    Location loc2 = subLine.remainingRegion.checkPoint(subLine.line.toSubSpace(v1D));
    if (includeEndPoints) {
        return ((loc1 != Location.OUTSIDE) && (loc2 != Location.OUTSIDE)) ? v1D : null;
    } else {
        return ((loc1 == Location.INSIDE) && (loc2 == Location.INSIDE)) ? v1D : null;
    }
}

// Method 2
public Vector2D intersection(final SubLine subLine, final boolean includeEndPoints) {
    // retrieve the underlying lines
    Line line1 = (Line) getHyperplane();
    Line line2 = (Line) subLine.getHyperplane();
    // compute the intersection on infinite line
    Vector2D v2D = line1.intersection(line2);
    // check location of point with respect to first sub-line
    Location loc1 = getRemainingRegion().checkPoint(line1.toSubSpace(v2D));
    // check location of point with respect to second sub-line
    Location loc2 = subLine.getRemainingRegion().checkPoint(line2.toSubSpace(v2D));
    if (includeEndPoints) {
        return ((loc1 != Location.OUTSIDE) && (loc2 != Location.OUTSIDE)) ? v2D : null;
    } else {
        return ((loc1 == Location.INSIDE) && (loc2 == Location.INSIDE)) ? v2D : null;
    }
}

    Exception Information:
    java.lang.NullPointerException
    
Please provide the fixed versions of all buggy functions in a single code block, with each fixed function preceded by a comment `// Fixed Method X` (where X is the method number starting from 1).
"#;

const EXAMPLE_OUTPUT: &str = r#"
```java```
// Fixed Method 1
public Vector3D intersection(final SubLine subLine, final boolean includeEndPoints) {
 
         // compute the intersection on infinite line
         Vector3D v1D = line.intersection(subLine.line);
         if (v1D == null) {
             return null;
         }
 
         // check location of point with respect to first sub-line
         Location loc1 = remainingRegion.checkPoint(line.toSubSpace(v1D));

        // check location of point with respect to second sub-line
        Location loc2 = subLine.remainingRegion.checkPoint(subLine.line.toSubSpace(v1D));

        if (includeEndPoints) {
            return ((loc1 != Location.OUTSIDE) && (loc2 != Location.OUTSIDE)) ? v1D : null;
        } else {
            return ((loc1 == Location.INSIDE) && (loc2 == Location.INSIDE)) ? v1D : null;
        }

    }

// Fixed Method 2
public Vector2D intersection(final SubLine subLine, final boolean includeEndPoints) {

        // retrieve the underlying lines
        Line line1 = (Line) getHyperplane();
        Line line2 = (Line) subLine.getHyperplane();
 
         // compute the intersection on infinite line
         Vector2D v2D = line1.intersection(line2);
         if (v2D == null) {
             return null;
         }
 
         // check location of point with respect to first sub-line
         Location loc1 = getRemainingRegion().checkPoint(line1.toSubSpace(v2D));

        // check location of point with respect to second sub-line
        Location loc2 = subLine.getRemainingRegion().checkPoint(line2.toSubSpace(v2D));

        if (includeEndPoints) {
            return ((loc1 != Location.OUTSIDE) && (loc2 != Location.OUTSIDE)) ? v2D : null;
        } else {
            return ((loc1 == Location.INSIDE) && (loc2 == Location.INSIDE)) ? v2D : null;
        }

    }
"#;

const OUTPUT_FORMAT_REMINDER: &str = "Output only the fixed functions in a single code block, \
with each function preceded by a comment `// Fixed Method X` (where X is the method number). \
Do not include any other text or explanations.";

const WIDTH_GUIDANCE_HEAD: &str = "You are performing breadth-based program repair, where each attempt \
should try a different strategy to fix the bug. Your goal is to propose a patch that changes the actual \
program logic and has a meaningful chance of resolving the issue.\n\n \
Do NOT make cosmetic changes such as modifying comments, reformatting code, or adjusting error messages — these are not valid fixes.\n\
Avoid repeating any previous fix exactly, even with minor rewording or refactoring. Repetition wastes exploration.\n\
Think diversely: Your new patch should be different in its repair logic. \n\
Below are previous fix attempts in this breadth search. Study them to avoid overlap and improve diversity:\n\n";

const WIDTH_GUIDANCE_TAIL: &str = "The following is the original buggy code and its debugging \
information. Use this information to guide your fix:\n";

const DEPTH_GUIDANCE_HEAD: &str = "You are performing iterative program repair.\n\n\
Your task is to **analyze the previous patches and their test outcomes**, understand why they failed, and produce an **improved fix**. \n\
Do NOT repeat previous fixes verbatim — this includes identical control flow, clone/add logic, or unchanged loops. Superficial edits (like renaming, formatting, or rephrased error messages) are also unacceptable.\n\
Instead, make meaningful changes to the program logic that could plausibly fix the remaining test failures.\n\
You may slightly revise the logic structure, change loop boundaries, add filtering, handle special cases, or introduce helper methods to make your fix more robust.\n\n";

const DEPTH_GUIDANCE_TAIL: &str = "The following is the most recent attempted fix and its debugging \
results. Use this information to guide your fix:\n";

/// Number the buggy methods the way the few-shot example shows them.
pub fn number_methods(samples: &[MethodSample]) -> String {
    samples
        .iter()
        .enumerate()
        .map(|(i, sample)| format!("// Method {}\n{}", i + 1, sample.buggy_code.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Build the full message list for one round: few-shot history plus the
/// query for this bug. Trace files are read here so a missing or oversized
/// trace degrades inside the prompt instead of failing the round.
pub fn build_messages(
    mode: PromptMode,
    samples: &[MethodSample],
    exception_info: &str,
    traces: &TraceFiles,
) -> Vec<ChatMessage> {
    let buggy = number_methods(samples);
    let query = match mode {
        PromptMode::DebugInfo => DEBUG_QUERY
            .replace("{BUGGY_CODE}", &buggy)
            .replace("{DEBUG_INFO}", &read_debug_info(&traces.debug_info))
            .replace("{CALL_INFO}", &read_method_calls(&traces.method_calls)),
        PromptMode::Pure => PURE_QUERY.replace("{BUGGY_CODE}", &buggy),
        PromptMode::Exception => EXCEPTION_QUERY
            .replace("{BUGGY_CODE}", &buggy)
            .replace("{EXCEPTION_INFO}", exception_info),
    };

    let mut messages = few_shot_history(mode);
    messages.push(ChatMessage::user(query));
    messages
}

fn few_shot_history(mode: PromptMode) -> Vec<ChatMessage> {
    let (instruction, example_input) = match mode {
        PromptMode::DebugInfo => (DEBUG_INSTRUCTION, EXAMPLE_INPUT_DEBUG),
        PromptMode::Pure => (PURE_INSTRUCTION, EXAMPLE_INPUT_PURE),
        PromptMode::Exception => (EXCEPTION_INSTRUCTION, EXAMPLE_INPUT_EXCEPTION),
    };
    vec![
        ChatMessage::system(instruction),
        ChatMessage::user(example_input),
        ChatMessage::assistant(EXAMPLE_OUTPUT),
    ]
}

/// Fold earlier breadth attempts into the final query. No-op on the first
/// attempt, when there is no history to diversify against.
pub fn apply_width_guidance(messages: &mut [ChatMessage], history: &[String]) {
    if history.is_empty() {
        return;
    }
    if let Some(last) = messages.last_mut() {
        let attempts = history.join("\n\n");
        last.content = format!(
            "{WIDTH_GUIDANCE_HEAD}{attempts}\n{WIDTH_GUIDANCE_TAIL}{}{OUTPUT_FORMAT_REMINDER}",
            last.content
        );
    }
}

/// Fold this width attempt's earlier refinement rounds into the final query.
pub fn apply_depth_guidance(messages: &mut [ChatMessage], history: &[String]) {
    if history.is_empty() {
        return;
    }
    if let Some(last) = messages.last_mut() {
        let attempts = history.join("\n\n");
        last.content = format!(
            "{DEPTH_GUIDANCE_HEAD}{attempts}{DEPTH_GUIDANCE_TAIL}{}{OUTPUT_FORMAT_REMINDER}",
            last.content
        );
    }
}

/// History entry recorded after each refinement round.
pub fn depth_history_entry(iteration: u32, response: &str, label: &str) -> String {
    format!(
        "[Iteration {iteration}] Attempted fix:\n{}\n[Iteration {iteration}] Test result: {label}",
        response.trim()
    )
}

/// History entry recorded after each breadth attempt's opening round.
pub fn width_history_entry(width: u32, response: &str, label: &str) -> String {
    format!(
        "[Width Attempt {width}] Attempted fix:\n{}\n[Width Attempt {width}] Test result: {label}",
        response.trim()
    )
}
