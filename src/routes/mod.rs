pub mod analyze;
pub mod chain;

use axum::{
    response::{Html, IntoResponse},
    Json,
};
use serde_json::json;

pub use analyze::analyze_image;

pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Freshness Analyzer</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: #f4f7f2;
            margin: 0;
            padding: 40px 20px;
        }

        .container {
            background: white;
            border-radius: 16px;
            box-shadow: 0 10px 30px rgba(0,0,0,0.1);
            max-width: 760px;
            margin: 0 auto;
            padding: 32px;
        }

        h1 { color: #2f5d34; margin-top: 0; }

        .hint { color: #777; font-size: 0.9em; }

        button {
            background: #2f5d34;
            color: white;
            border: none;
            border-radius: 8px;
            padding: 10px 20px;
            font-size: 1em;
            cursor: pointer;
        }

        button:disabled { background: #9bb59e; cursor: wait; }

        img { max-width: 100%; border-radius: 8px; margin-top: 20px; display: none; }

        pre {
            white-space: pre-wrap;
            background: #f8faf7;
            border-radius: 8px;
            padding: 16px;
            line-height: 1.5;
            display: none;
        }

        .error { color: #b33; display: none; }
    </style>
</head>
<body>
    <div class="container">
        <h1>Freshness Analyzer</h1>
        <p class="hint">Upload a JPEG or PNG photo of food to get a freshness report.</p>

        <form id="form">
            <input type="file" id="file" name="file" accept="image/jpeg,image/png" required>
            <button type="submit" id="submit">Analyze</button>
        </form>

        <img id="preview" alt="Preview">
        <p class="error" id="error"></p>
        <pre id="report"></pre>
    </div>

    <script>
        const form = document.getElementById('form');
        const fileInput = document.getElementById('file');
        const submit = document.getElementById('submit');
        const preview = document.getElementById('preview');
        const report = document.getElementById('report');
        const errorBox = document.getElementById('error');

        fileInput.addEventListener('change', () => {
            const file = fileInput.files[0];
            if (file) {
                preview.src = URL.createObjectURL(file);
                preview.style.display = 'block';
            }
        });

        form.addEventListener('submit', async (e) => {
            e.preventDefault();
            const file = fileInput.files[0];
            if (!file) return;

            submit.disabled = true;
            report.style.display = 'none';
            errorBox.style.display = 'none';

            const formData = new FormData();
            formData.append('file', file);

            try {
                const response = await fetch('/api/analyze-image', {
                    method: 'POST',
                    body: formData
                });
                const body = await response.json();
                if (!response.ok) {
                    throw new Error(body.detail || 'Analysis failed');
                }
                report.textContent = body.analysis;
                report.style.display = 'block';
            } catch (error) {
                errorBox.textContent = 'Error: ' + error.message;
                errorBox.style.display = 'block';
            } finally {
                submit.disabled = false;
            }
        });
    </script>
</body>
</html>
"#;
