//! End-to-end CLI scenarios against a local catalog server, modeled on
//! spec.md §8's concrete scenarios (S1 empty catalog, S2 single entry,
//! S6 V3 layout + absent error log, S7 id filters).

use std::collections::HashMap;
use std::io::Write as _;
use std::time::Duration;

use assert_cmd::Command;
use tiny_http::{Header, Response, Server};

struct Route {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

fn json_route(status: u16, body: serde_json::Value) -> Route {
    Route { status, content_type: "application/json", body: serde_json::to_vec(&body).unwrap() }
}

/// Bind a server and return it along with its address, so callers can
/// bake the address into route bodies before actually serving them.
fn bind_server() -> (Server, String) {
    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_string();
    (server, addr)
}

/// Serve `routes` on a background thread until it has been idle for two
/// seconds; good enough for a single CLI invocation that makes a bounded,
/// known set of requests.
fn serve(server: Server, routes: HashMap<String, Route>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        while let Ok(Some(request)) = server.recv_timeout(Duration::from_secs(2)) {
            let url = request.url().to_string();
            match routes.get(&url) {
                Some(route) => {
                    let header = Header::from_bytes("Content-Type", route.content_type).unwrap();
                    let response =
                        Response::from_data(route.body.clone()).with_status_code(route.status).with_header(header);
                    request.respond(response).ok();
                }
                None => {
                    request.respond(Response::from_string("not found").with_status_code(404)).ok();
                }
            }
        }
    })
}

fn service_index_doc(catalog_uri: &str, flatcontainer_uri: &str) -> serde_json::Value {
    serde_json::json!({
        "resources": [
            {"@id": catalog_uri, "@type": "Catalog/3.0.0"},
            {"@id": flatcontainer_uri, "@type": "PackageBaseAddress/3.0.0"},
        ]
    })
}

fn single_page_catalog_doc(page_uri: &str) -> serde_json::Value {
    serde_json::json!({
        "items": [
            {"@id": page_uri, "@type": "CatalogPage", "commitId": "c1", "commitTimeStamp": "2024-06-01T00:00:00Z"},
        ]
    })
}

fn nupkg_bytes(id: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let cursor = std::io::Cursor::new(&mut buf);
        let mut zip = zip::ZipWriter::new(cursor);
        let options: zip::write::SimpleFileOptions = zip::write::SimpleFileOptions::default();
        zip.start_file(format!("{id}.nuspec"), options).unwrap();
        zip.write_all(
            format!("<package><metadata><id>{id}</id><version>1.0.0</version></metadata></package>").as_bytes(),
        )
        .unwrap();
        zip.finish().unwrap();
    }
    buf
}

#[test]
fn list_prints_nothing_for_an_empty_catalog() {
    let (server, addr) = bind_server();
    let mut routes = HashMap::new();
    routes.insert(
        "/index.json".to_string(),
        json_route(200, service_index_doc(&format!("http://{addr}/catalog/index.json"), &format!("http://{addr}/flat"))),
    );
    routes.insert("/catalog/index.json".to_string(), json_route(200, serde_json::json!({"items": []})));
    let _handle = serve(server, routes);

    let mut cmd = Command::cargo_bin("catkeeper").unwrap();
    let assert = cmd.arg("list").arg(format!("http://{addr}/index.json")).assert();
    let output = assert.success().get_output().stdout.clone();
    assert!(output.is_empty());
}

#[test]
fn list_prints_id_and_version_for_a_single_catalog_entry() {
    let (server, addr) = bind_server();
    let mut routes = HashMap::new();
    routes.insert(
        "/index.json".to_string(),
        json_route(200, service_index_doc(&format!("http://{addr}/catalog/index.json"), &format!("http://{addr}/flat"))),
    );
    routes.insert(
        "/catalog/index.json".to_string(),
        json_route(200, single_page_catalog_doc(&format!("http://{addr}/catalog/page0.json"))),
    );
    routes.insert(
        "/catalog/page0.json".to_string(),
        json_route(
            200,
            serde_json::json!({
                "items": [
                    {"@id": "http://example.com/foo.1.0.0.json", "@type": "nuget:PackageDetails",
                     "commitId": "c1", "commitTimeStamp": "2024-06-01T00:00:00Z",
                     "nuget:id": "Foo", "nuget:version": "1.0.0"},
                ]
            }),
        ),
    );
    let _handle = serve(server, routes);

    let mut cmd = Command::cargo_bin("catkeeper").unwrap();
    let assert = cmd.arg("list").arg(format!("http://{addr}/index.json")).assert();
    let output = assert.success().get_output().stdout.clone();
    let text = String::from_utf8(output).unwrap();
    assert_eq!(text.trim(), "Foo 1.0.0.0");
}

#[test]
fn nupkgs_mirrors_a_single_archive_into_v3_layout_with_no_error_log() {
    let (server, addr) = bind_server();
    let archive_path = "/flat/foo/1.0.0.0/foo.1.0.0.0.nupkg";
    let mut routes = HashMap::new();
    routes.insert(
        "/index.json".to_string(),
        json_route(200, service_index_doc(&format!("http://{addr}/catalog/index.json"), &format!("http://{addr}/flat"))),
    );
    routes.insert(
        "/catalog/index.json".to_string(),
        json_route(200, single_page_catalog_doc(&format!("http://{addr}/catalog/page0.json"))),
    );
    routes.insert(
        "/catalog/page0.json".to_string(),
        json_route(
            200,
            serde_json::json!({
                "items": [
                    {"@id": "http://example.com/foo.1.0.0.json", "@type": "nuget:PackageDetails",
                     "commitId": "c1", "commitTimeStamp": "2024-06-01T00:00:00Z",
                     "nuget:id": "Foo", "nuget:version": "1.0.0"},
                ]
            }),
        ),
    );
    routes.insert(
        archive_path.to_string(),
        Route { status: 200, content_type: "application/octet-stream", body: nupkg_bytes("foo") },
    );
    let _handle = serve(server, routes);

    let output_dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("catkeeper").unwrap();
    cmd.arg("nupkgs")
        .arg(format!("http://{addr}/index.json"))
        .arg("-o")
        .arg(output_dir.path())
        .arg("--folder-format")
        .arg("v3")
        .arg("--delay")
        .arg("0");
    cmd.assert().success();

    let archive = output_dir.path().join("foo").join("1.0.0.0").join("foo.1.0.0.0.nupkg");
    assert!(archive.exists(), "archive should be written under v3 layout");
    assert!(output_dir.path().join("foo/1.0.0.0/1.0.0.0.nupkg.sha512").exists());
    assert!(output_dir.path().join("foo/1.0.0.0/foo.nuspec").exists());
    assert!(output_dir.path().join("updatedFiles.txt").exists());
    assert!(!output_dir.path().join("lastRunErrors.txt").exists());
    assert!(output_dir.path().join("cursor.json").exists());
}

#[test]
fn nupkgs_exclude_glob_skips_the_matching_id() {
    let (server, addr) = bind_server();
    let foo_archive_path = "/flat/foo/1.0.0.0/foo.1.0.0.0.nupkg";
    let mut routes = HashMap::new();
    routes.insert(
        "/index.json".to_string(),
        json_route(200, service_index_doc(&format!("http://{addr}/catalog/index.json"), &format!("http://{addr}/flat"))),
    );
    routes.insert(
        "/catalog/index.json".to_string(),
        json_route(200, single_page_catalog_doc(&format!("http://{addr}/catalog/page0.json"))),
    );
    routes.insert(
        "/catalog/page0.json".to_string(),
        json_route(
            200,
            serde_json::json!({
                "items": [
                    {"@id": "http://example.com/foo.1.0.0.json", "@type": "nuget:PackageDetails",
                     "commitId": "c1", "commitTimeStamp": "2024-06-01T00:00:00Z",
                     "nuget:id": "Foo", "nuget:version": "1.0.0"},
                    {"@id": "http://example.com/bar.1.0.0.json", "@type": "nuget:PackageDetails",
                     "commitId": "c2", "commitTimeStamp": "2024-06-01T00:00:01Z",
                     "nuget:id": "Bar", "nuget:version": "1.0.0"},
                ]
            }),
        ),
    );
    routes.insert(
        foo_archive_path.to_string(),
        Route { status: 200, content_type: "application/octet-stream", body: nupkg_bytes("foo") },
    );
    // No route for bar's archive: if the filter didn't exclude it, the
    // server's catch-all 404 would turn it into a run error we'd detect.
    let _handle = serve(server, routes);

    let output_dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("catkeeper").unwrap();
    cmd.arg("nupkgs")
        .arg(format!("http://{addr}/index.json"))
        .arg("-o")
        .arg(output_dir.path())
        .arg("--folder-format")
        .arg("v2")
        .arg("--delay")
        .arg("0")
        .arg("-e")
        .arg("Bar");
    cmd.assert().success();

    assert!(output_dir.path().join("foo/foo.1.0.0.0.nupkg").exists());
    assert!(!output_dir.path().join("bar").exists());
    assert!(!output_dir.path().join("lastRunErrors.txt").exists());
}

#[test]
fn validate_reports_failure_when_the_archive_is_unreachable() {
    let (server, addr) = bind_server();
    let mut routes = HashMap::new();
    routes.insert(
        "/index.json".to_string(),
        json_route(200, service_index_doc(&format!("http://{addr}/catalog/index.json"), &format!("http://{addr}/flat"))),
    );
    routes.insert(
        "/catalog/index.json".to_string(),
        json_route(200, single_page_catalog_doc(&format!("http://{addr}/catalog/page0.json"))),
    );
    routes.insert(
        "/catalog/page0.json".to_string(),
        json_route(
            200,
            serde_json::json!({
                "items": [
                    {"@id": "http://example.com/foo.1.0.0.json", "@type": "nuget:PackageDetails",
                     "commitId": "c1", "commitTimeStamp": "2024-06-01T00:00:00Z",
                     "nuget:id": "Foo", "nuget:version": "1.0.0"},
                ]
            }),
        ),
    );
    // Deliberately no route for the archive: the server's catch-all 404
    // stands in for an unreachable package.
    let _handle = serve(server, routes);

    let mut cmd = Command::cargo_bin("catkeeper").unwrap();
    cmd.arg("validate").arg(format!("http://{addr}/index.json")).arg("--delay").arg("0");
    cmd.assert().failure().code(1);
}

#[test]
fn unrecognized_subcommand_exits_one_not_clap_default_two() {
    let mut cmd = Command::cargo_bin("catkeeper").unwrap();
    cmd.arg("not-a-real-subcommand");
    cmd.assert().failure().code(1);
}
