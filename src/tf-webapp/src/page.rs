use std::fmt::Write;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tf_serve::preprocess::SUPPORTED_EXTENSIONS;
use tf_serve::PredictionResult;

use crate::session::{SessionState, UploadedImage};

const STYLE: &str = r#"
body { margin: 0; font-family: sans-serif; display: flex; min-height: 100vh; }
aside { width: 18rem; padding: 1.5rem; background: #f0f2f6; }
main { flex: 1; padding: 1.5rem 2.5rem; }
.columns { display: flex; gap: 2rem; }
.left { flex: 1; } .right { flex: 2; }
.placeholder { border: 2px dashed #ccc; padding: 20px; text-align: center; border-radius: 10px;
  height: 300px; display: flex; flex-direction: column; justify-content: center; align-items: center; }
.placeholder p { color: #888; }
.preview { width: 100%; }
button { width: 100%; padding: 0.6rem; font-weight: bold; margin-top: 0.5rem; }
.success { background: #e6ffe6; padding: 0.8rem; border-radius: 6px; }
.info { background: #e8f0fe; padding: 0.8rem; border-radius: 6px; }
.top1 { background-color: #e6ffe6; color: #008000; padding: 15px; border-radius: 8px; font-size: 1.5em;
  font-weight: bold; text-align: center; border: 1px solid #008000; }
.bar-row { display: flex; align-items: center; gap: 0.5rem; margin: 0.3rem 0; }
.bar-label { width: 12rem; text-align: right; }
.bar-track { flex: 1; background: #eee; }
.bar { background: #1f77b4; height: 1.4rem; }
.caption { color: #888; font-size: 0.85em; }
"#;

const SCRIPT: &str = r#"
document.getElementById('file').addEventListener('change', async (event) => {
  const file = event.target.files[0];
  if (!file) return;
  const resp = await fetch('/upload', {
    method: 'POST',
    headers: { 'X-File-Name': encodeURIComponent(file.name) },
    body: file,
  });
  if (resp.ok) { location.reload(); } else { alert(await resp.text()); }
});
const form = document.getElementById('predict-form');
if (form) {
  form.addEventListener('submit', () => {
    document.getElementById('spinner').hidden = false;
    form.querySelector('button').disabled = true;
  });
}
"#;

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Render the whole page from the session state.
pub fn render(state: &SessionState) -> String {
    let accept: Vec<String> = SUPPORTED_EXTENSIONS
        .iter()
        .map(|ext| format!(".{}", ext))
        .collect();

    let left = match &state.upload {
        Some(image) => upload_panel(image),
        None => r#"<div class="placeholder">
  <p style="font-size: 1.1em;">No Image Uploaded</p>
  <p style="font-size: 0.9em; color: #aaa;">Upload an image on the left to begin.</p>
</div>"#
            .to_owned(),
    };

    let right = match (&state.predictions, &state.top_1_class) {
        (Some(predictions), Some(top_1)) => results_panel(predictions, top_1),
        _ => r#"<h3>Results Display Area</h3>
<div class="info">Upload an image and click 'Predict' to see the classification results here.</div>"#
            .to_owned(),
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>AI Classification App</title>
<style>{style}</style>
</head>
<body>
<aside>
<h1>AI Image Classifier</h1>
<p><strong>A simple application to classify uploaded images using a machine learning model.</strong></p>
<hr>
<h3>Instructions</h3>
<ol>
<li><strong>Upload</strong> an image file below (.jpg, .jpeg, or .png).</li>
<li>Click the <strong>'Predict'</strong> button.</li>
<li>View the top prediction and confidence scores in the main panel.</li>
</ol>
</aside>
<main>
<h2>Upload Image for Classification</h2>
<label for="file">Choose an image file...</label>
<input type="file" id="file" accept="{accept}" title="Drag and drop or browse to upload an image (.jpg, .jpeg, or .png)">
<div class="columns">
<div class="left">
{left}
</div>
<div class="right">
{right}
</div>
</div>
</main>
<script>{script}</script>
</body>
</html>
"#,
        style = STYLE,
        accept = accept.join(","),
        left = left,
        right = right,
        script = SCRIPT,
    )
}

fn upload_panel(image: &UploadedImage) -> String {
    format!(
        r#"<figure>
<img class="preview" src="data:{mime};base64,{data}" alt="{name}">
<figcaption>Uploaded Image</figcaption>
</figure>
<form id="predict-form" method="post" action="/predict">
<button type="submit">&#x1F680; Predict</button>
</form>
<p id="spinner" hidden>Processing image and running model...</p>"#,
        mime = image.mime(),
        data = STANDARD.encode(&image.data),
        name = escape(&image.file_name),
    )
}

fn results_panel(predictions: &PredictionResult, top_1: &str) -> String {
    let mut bars = String::new();
    for p in predictions {
        // Writing into a String cannot fail.
        let _ = write!(
            bars,
            r#"<div class="bar-row"><span class="bar-label">{name}</span><div class="bar-track"><div class="bar" style="width: {width:.1}%"></div></div><span>{confidence:.4}</span></div>
"#,
            name = escape(&p.class_name),
            width = p.confidence * 100.0,
            confidence = p.confidence,
        );
    }

    format!(
        r#"<div class="success">&#x2705; <strong>Prediction Complete!</strong></div>
<h3>&#x1F947; Top Prediction</h3>
<div class="top1">{top_1}</div>
<hr>
<h3>&#x1F4CA; Top 5 Predictions and Confidence</h3>
<div class="chart">
{bars}</div>
<p class="caption">Confidence score represents the model's certainty (0.0 to 1.0).</p>"#,
        top_1 = escape(top_1),
        bars = bars,
    )
}

/// Stand-in for a framework error page, shown when inference fails.
pub fn error_page(message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Error</title></head>
<body>
<h2>Something went wrong</h2>
<pre>{}</pre>
<p><a href="/">Back</a></p>
</body>
</html>
"#,
        escape(message)
    )
}
