//! Language coverage for the script backend, driven through the executor
//! the way agent-generated code reaches it.

use codeact_core::{BoundedExecutor, ExecutionState};

async fn run(code: &str) -> String {
    let executor = BoundedExecutor::builder().build().unwrap();
    executor.execute(&ExecutionState::empty(), code, None).await
}

#[tokio::test]
async fn test_control_flow_and_functions() {
    let code = r#"
def classify(n, threshold=10):
    if n < 0:
        return "negative"
    elif n < threshold:
        return "small"
    else:
        return "large"

for value in [-1, 3, 42]:
    print(value, classify(value))

i = 0
while True:
    i += 1
    if i == 2:
        continue
    if i > 3:
        break
    print("i", i)
"#;
    assert_eq!(
        run(code).await,
        "-1 negative\n3 small\n42 large\ni 1\ni 3\n"
    );
}

#[tokio::test]
async fn test_comprehensions_lambdas_and_builtins() {
    let code = r#"
xs = [3, 1, 2]
squares = [x * x for x in xs if x > 1]
print(squares)
print(sorted(xs, key=lambda v: -v))
print(sum(xs), min(xs), max(xs), len(xs))
print(list(zip(["a", "b"], [1, 2])))
print({k: v for k, v in enumerate("ab")})
print(any(x > 2 for x in xs), all(x > 2 for x in xs))
"#;
    assert_eq!(
        run(code).await,
        "[9, 4]\n[3, 2, 1]\n6 1 3 3\n[('a', 1), ('b', 2)]\n{0: 'a', 1: 'b'}\nTrue False\n"
    );
}

#[tokio::test]
async fn test_strings_and_formatting() {
    let code = r#"
name = "settings"
ratio = 2 / 3
print(f"open {name.upper()} at {ratio:.2f}")
print("{} of {}".format(1, 2), "%s=%d" % ("x", 5))
print(", ".join(["a", "b", "c"]), "a,b".split(","))
print("Wi-Fi".lower().startswith("wi"), "  pad ".strip())
print(repr("it's"), str(3.0), int("7") + 1)
"#;
    assert_eq!(
        run(code).await,
        "open SETTINGS at 0.67\n1 of 2 x=5\na, b, c ['a', 'b']\nTrue pad\n\"it's\" 3.0 8\n"
    );
}

#[tokio::test]
async fn test_dicts_tuples_and_slices() {
    let code = r#"
screen = {"title": "Home", "buttons": ["ok", "cancel", "help"]}
screen["visible"] = True
print(screen.get("title"), screen.get("missing", "-"))
print(screen["buttons"][1:], screen["buttons"][-1])
first, (second, third) = 1, [2, 3]
print(first, second + third)
print(sorted(screen.keys()))
"#;
    assert_eq!(
        run(code).await,
        "Home -\n['cancel', 'help'] help\n1 5\n['buttons', 'title', 'visible']\n"
    );
}

#[tokio::test]
async fn test_try_except_else_finally() {
    let code = r#"
def parse(text):
    try:
        value = int(text)
    except ValueError as e:
        print("bad:", e)
        return None
    else:
        return value
    finally:
        print("checked", text)

print(parse("12"))
print(parse("x"))
"#;
    assert_eq!(
        run(code).await,
        "checked 12\n12\nbad: invalid literal for int() with base 10: 'x'\nchecked x\nNone\n"
    );
}

#[tokio::test]
async fn test_raise_from_nested_function_reports_user_kind() {
    let code = "def check(level):\n    if level < 20:\n        raise ValueError(f'battery low: {level}%')\n\ncheck(12)\n";
    let out = run(code).await;
    assert!(out.starts_with("Error: ValueError: battery low: 12%\n"));
    assert!(out.contains("line 3, in check"));
}

#[tokio::test]
async fn test_recursion_limit_is_a_fault() {
    let out = run("def f(n):\n    return f(n + 1)\n\nf(0)").await;
    assert!(out.starts_with("Error: RecursionError: maximum recursion depth exceeded"));
}

#[tokio::test]
async fn test_modules_json_re_math() {
    let code = r#"
import json
import re
import math
data = json.loads('{"items": [1, 2, 3], "ok": true}')
print(data["items"], data["ok"])
print(json.dumps({"b": 1, "a": [True, None]}))
print(re.findall(r"\d+", "id 12 and 345"))
print(re.sub(r"\s+", "_", "a  b c"))
m = re.search(r"(\w+)@(\w+)", "mail bob@example now")
print(m.group(1), m.group(2))
print(math.floor(3.7), math.sqrt(9))
"#;
    assert_eq!(
        run(code).await,
        "[1, 2, 3] True\n{\"b\": 1, \"a\": [true, null]}\n['12', '345']\na_b_c\nbob example\n3 3.0\n"
    );
}

#[tokio::test]
async fn test_eval_and_exec_share_the_namespace() {
    let code = "exec('y = 6 * 7')\nprint(eval('y + 0'))";
    assert_eq!(run(code).await, "42\n");
}

#[tokio::test]
async fn test_unsupported_syntax_is_a_syntax_error() {
    let out = run("class Device:\n    pass").await;
    assert!(out.starts_with("Error: SyntaxError:"), "{out}");
}

#[tokio::test]
async fn test_range_length_near_integer_bounds() {
    let code = "r = range(0, 9223372036854775807, 2)\nprint(len(r))\nprint(r[-1])";
    assert_eq!(run(code).await, "4611686018427387904\n9223372036854775806\n");
}

#[tokio::test]
async fn test_keyword_only_parameters() {
    let code = r#"
def tap(x, y, *, long_press=False):
    return (x, y, long_press)

print(tap(1, 2))
print(tap(1, 2, long_press=True))
try:
    tap(1, 2, True)
except TypeError:
    print("positional rejected")
"#;
    assert_eq!(
        run(code).await,
        "(1, 2, False)\n(1, 2, True)\npositional rejected\n"
    );
}

#[tokio::test]
async fn test_import_lists_and_nested_format_specs() {
    let code = "import json, math as m\nw = 6\nprint(f'{m.floor(2.5):>{w}}|', json.dumps([1]))";
    assert_eq!(run(code).await, "     2| [1]\n");
}

#[tokio::test]
async fn test_with_statement_is_a_syntax_error() {
    let out = run("with open('x') as f:\n    pass").await;
    assert!(out.starts_with("Error: SyntaxError:"), "{out}");
}

#[tokio::test]
async fn test_deep_eval_input_is_refused() {
    let code = format!("eval('{}1{}')", "[".repeat(5_000), "]".repeat(5_000));
    let out = run(&code).await;
    assert!(out.starts_with("Error: SyntaxError:"), "{out}");
}
