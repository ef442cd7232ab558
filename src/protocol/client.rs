//! Client side of the Git smart-HTTP protocol: ref discovery against a remote, packfile
//! negotiation for fetch/clone, and ref-update submission for push. Mirrors the pkt-line and
//! side-band framing the server half (`smart`, `pack`) speaks, but drives it from the caller's
//! end against an arbitrary `reqwest`-reachable remote instead of a local `RepositoryAccess`.

use bytes::{Bytes, BytesMut};

use crate::{
    config::{AuthProvider, Credentials, ProgressCallback, ProgressEvent},
    errors::GitError,
    hash::ObjectHash,
    protocol::{
        types::{Capability, GitRef, PKT_LINE_END_MARKER, RefCommand, ServiceType, SideBand},
        utils::{add_pkt_line_string, read_pkt_line},
    },
};

/// Refs and capabilities advertised by a remote in response to a discovery request.
pub struct RefAdvertisement {
    pub refs: Vec<GitRef>,
    pub capabilities: Vec<Capability>,
    /// Target of `HEAD` when the remote advertises it via the `symref` capability.
    pub head_target: Option<String>,
}

/// Outcome of a `git-receive-pack` push: one status line per ref command.
pub struct PushResult {
    pub ref_name: String,
    pub ok: bool,
    pub message: Option<String>,
}

/// A handle to a single remote, speaking the smart-HTTP protocol over `reqwest`.
pub struct GitClient {
    http: reqwest::Client,
    remote_url: String,
    auth: Option<AuthProvider>,
    progress: Option<ProgressCallback>,
}

impl GitClient {
    pub fn new(remote_url: impl Into<String>) -> Self {
        GitClient {
            http: reqwest::Client::new(),
            remote_url: remote_url.into(),
            auth: None,
            progress: None,
        }
    }

    pub fn with_auth(mut self, auth: AuthProvider) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(cb) = &self.progress {
            cb(event);
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth.as_ref().and_then(|a| a.credentials()) {
            Some(Credentials::Basic { username, password }) => {
                builder.basic_auth(username, Some(password))
            }
            Some(Credentials::Bearer(token)) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Classify a non-2xx HTTP response into the error taxonomy the rest of the crate uses.
    fn classify_status(status: reqwest::StatusCode, body: &str) -> GitError {
        match status.as_u16() {
            401 => GitError::AuthRequired(body.to_string()),
            403 => GitError::AccessForbidden(body.to_string()),
            404 => GitError::RepoNotFound,
            // reqwest surfaces a CORS rejection as a transport failure before a status code
            // even exists, so a crate-side 4xx here is always a genuine server decision.
            code if (400..500).contains(&code) => {
                GitError::InvalidResponse(format!("{status}: {body}"))
            }
            code if (500..600).contains(&code) => {
                GitError::ServerError(format!("{status}: {body}"))
            }
            _ => GitError::InvalidResponse(format!("{status}: {body}")),
        }
    }

    fn classify_transport(err: reqwest::Error) -> GitError {
        let message = err.to_string();
        if err.is_timeout() {
            GitError::NetworkTimeout(message)
        } else if Self::looks_like_cors_block(&err, &message) {
            GitError::CORSBlocked(message)
        } else {
            GitError::NetworkError(message)
        }
    }

    /// A cross-origin rejection never reaches us as an HTTP status in a browser-hosted fetch
    /// backend — it surfaces as a transport failure with no status at all and a message naming
    /// the browser's CORS policy. Ordinary connection failures (refused, DNS, reset) always miss
    /// both conditions, so this only fires on the cases §4.9.1/§7 call out.
    fn looks_like_cors_block(err: &reqwest::Error, message: &str) -> bool {
        err.status().is_none()
            && (message.contains("CORS")
                || message.contains("Cross-Origin")
                || message.contains("Failed to fetch")
                || message.contains("NetworkError when attempting to fetch resource"))
    }

    /// `GET {remote}/info/refs?service=<service>` — the discovery phase of both fetch and push.
    pub async fn discover_refs(&self, service: ServiceType) -> Result<RefAdvertisement, GitError> {
        let url = format!(
            "{}/info/refs?service={}",
            self.remote_url.trim_end_matches('/'),
            service
        );
        let resp = self
            .authorize(self.http.get(&url))
            .send()
            .await
            .map_err(Self::classify_transport)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }
        let body = resp.bytes().await.map_err(Self::classify_transport)?;
        parse_ref_advertisement(body, service)
    }

    /// Negotiate and fetch a packfile for `wants` given the caller's current `haves`.
    ///
    /// Returns the raw packfile bytes once the remote responds with `NAK`/`ACK ... ready` and
    /// its pack stream, demultiplexing side-band-64k framing if the remote advertised it.
    pub async fn fetch_pack(
        &self,
        wants: &[ObjectHash],
        haves: &[ObjectHash],
        capabilities: &[Capability],
    ) -> Result<Vec<u8>, GitError> {
        let url = format!(
            "{}/git-upload-pack",
            self.remote_url.trim_end_matches('/')
        );

        let mut body = BytesMut::new();
        let cap_line = capabilities
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(" ");

        for (i, want) in wants.iter().enumerate() {
            let line = if i == 0 && !cap_line.is_empty() {
                format!("want {want}\0{cap_line}\n")
            } else {
                format!("want {want}\n")
            };
            add_pkt_line_string(&mut body, line);
        }
        body.extend_from_slice(PKT_LINE_END_MARKER);

        for have in haves {
            add_pkt_line_string(&mut body, format!("have {have}\n"));
        }
        add_pkt_line_string(&mut body, "done\n".to_string());

        let resp = self
            .authorize(
                self.http
                    .post(&url)
                    .header("content-type", "application/x-git-upload-pack-request")
                    .body(body.freeze()),
            )
            .send()
            .await
            .map_err(Self::classify_transport)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &text));
        }

        let raw = resp.bytes().await.map_err(Self::classify_transport)?;
        let side_band = capabilities.iter().any(|c| {
            matches!(c, Capability::SideBand | Capability::SideBand64k)
        });
        demux_upload_pack_response(raw, side_band, |n| self.emit(n))
    }

    /// Push `commands` to the remote, uploading `pack_data` alongside the ref-update request.
    pub async fn send_pack(
        &self,
        commands: &[RefCommand],
        pack_data: &[u8],
        capabilities: &[Capability],
    ) -> Result<Vec<PushResult>, GitError> {
        let url = format!(
            "{}/git-receive-pack",
            self.remote_url.trim_end_matches('/')
        );

        let mut body = BytesMut::new();
        let cap_line = capabilities
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(" ");

        for (i, cmd) in commands.iter().enumerate() {
            let line = if i == 0 && !cap_line.is_empty() {
                format!(
                    "{} {} {}\0{}\n",
                    cmd.old_hash, cmd.new_hash, cmd.ref_name, cap_line
                )
            } else {
                format!("{} {} {}\n", cmd.old_hash, cmd.new_hash, cmd.ref_name)
            };
            add_pkt_line_string(&mut body, line);
        }
        body.extend_from_slice(PKT_LINE_END_MARKER);
        body.extend_from_slice(pack_data);

        let resp = self
            .authorize(
                self.http
                    .post(&url)
                    .header("content-type", "application/x-git-receive-pack-request")
                    .body(body.freeze()),
            )
            .send()
            .await
            .map_err(Self::classify_transport)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &text));
        }

        let raw = resp.bytes().await.map_err(Self::classify_transport)?;
        parse_report_status(raw)
    }
}

/// Parse the `info/refs` smart-HTTP discovery response: a service announcement pkt-line, a
/// flush, then one ref per pkt-line with capabilities riding the NUL byte of the first one.
fn parse_ref_advertisement(
    mut body: Bytes,
    service: ServiceType,
) -> Result<RefAdvertisement, GitError> {
    let expected_header = format!("# service={service}\n");

    let (consumed, first) = read_pkt_line(&mut body);
    if consumed == 0 {
        return Err(GitError::InvalidResponse(
            "empty ref advertisement".to_string(),
        ));
    }
    let first_str = String::from_utf8_lossy(&first);
    if first_str != expected_header {
        return Err(GitError::InvalidResponse(format!(
            "unexpected discovery header: {first_str:?}"
        )));
    }

    // Flush line terminating the service announcement.
    let (consumed, _) = read_pkt_line(&mut body);
    if consumed != 4 {
        return Err(GitError::InvalidResponse(
            "missing flush after service header".to_string(),
        ));
    }

    let mut refs = Vec::new();
    let mut capabilities = Vec::new();
    let mut head_target = None;
    let mut first_ref = true;

    loop {
        let (consumed, line) = read_pkt_line(&mut body);
        if consumed == 0 {
            break;
        }
        if line.is_empty() {
            break;
        }
        let mut text = String::from_utf8_lossy(&line).trim_end_matches('\n').to_string();

        if first_ref {
            first_ref = false;
            if let Some(nul) = text.find('\0') {
                let cap_str = text[nul + 1..].to_string();
                text.truncate(nul);
                for tok in cap_str.split_whitespace() {
                    if let Ok(cap) = tok.parse::<Capability>() {
                        if let Capability::Symref(s) = &cap {
                            if let Some((_, target)) = s.split_once(':') {
                                head_target = Some(target.to_string());
                            }
                        }
                        capabilities.push(cap);
                    }
                }
            }
        }

        if let Some((hash, name)) = text.split_once(' ') {
            if name == "capabilities^{}" {
                continue;
            }
            refs.push(GitRef {
                name: name.to_string(),
                hash: hash.to_string(),
            });
        }
    }

    Ok(RefAdvertisement {
        refs,
        capabilities,
        head_target,
    })
}

/// Demultiplex an upload-pack response body into raw packfile bytes, honoring `NAK`/`ACK`
/// acknowledgment lines and side-band-64k progress/error channels when the remote uses them.
fn demux_upload_pack_response(
    mut body: Bytes,
    side_band: bool,
    mut on_progress: impl FnMut(ProgressEvent),
) -> Result<Vec<u8>, GitError> {
    // Skip acknowledgment section: one or more pkt-lines (`NAK`/`ACK ...`) up to the first
    // that begins the pack stream proper.
    loop {
        if body.is_empty() {
            return Err(GitError::InvalidResponse(
                "upload-pack response ended before a packfile arrived".to_string(),
            ));
        }
        // Once side-band framing starts, or the raw `PACK` magic appears, the negotiation
        // section is over.
        if !side_band && body.starts_with(b"PACK") {
            break;
        }
        if side_band {
            // A side-band pkt-line's first byte is the channel id; channel 1 is pack data.
            // Peek without consuming by cloning the length-prefixed slice.
            let mut probe = body.clone();
            let (consumed, payload) = read_pkt_line(&mut probe);
            if consumed == 0 {
                return Err(GitError::InvalidResponse(
                    "truncated pkt-line in upload-pack response".to_string(),
                ));
            }
            if !payload.is_empty() && payload[0] == SideBand::PackfileData.value() {
                break;
            }
        }

        let (consumed, line) = read_pkt_line(&mut body);
        if consumed == 0 {
            return Err(GitError::InvalidResponse(
                "truncated pkt-line in upload-pack response".to_string(),
            ));
        }
        if line.is_empty() {
            continue;
        }
        let text = String::from_utf8_lossy(&line);
        if !(text.starts_with("NAK") || text.starts_with("ACK")) {
            return Err(GitError::InvalidResponse(format!(
                "unexpected line before packfile: {text:?}"
            )));
        }
    }

    if !side_band {
        return Ok(body.to_vec());
    }

    let mut pack = Vec::new();
    loop {
        let (consumed, payload) = read_pkt_line(&mut body);
        if consumed == 0 {
            break;
        }
        if payload.is_empty() {
            continue;
        }
        let channel = payload[0];
        let data = &payload[1..];
        if channel == SideBand::PackfileData.value() {
            pack.extend_from_slice(data);
        } else if channel == SideBand::ProgressInfo.value() {
            on_progress(ProgressEvent::Receiving {
                bytes: pack.len(),
                total: None,
            });
        } else if channel == SideBand::Error.value() {
            return Err(GitError::ServerError(
                String::from_utf8_lossy(data).to_string(),
            ));
        }
    }
    Ok(pack)
}

/// Parse a `report-status`/`report-status-v2` response body from `git-receive-pack`.
fn parse_report_status(body: Bytes) -> Result<Vec<PushResult>, GitError> {
    // The response may itself be side-band framed (channel 1 carries the report); unwrap a
    // single layer if present by checking whether the first payload byte looks like a channel
    // id rather than the literal `u` of `unpack`.
    let mut unwrapped = BytesMut::new();
    let mut probe = body.clone();
    let mut looks_side_banded = true;
    loop {
        let (consumed, payload) = read_pkt_line(&mut probe);
        if consumed == 0 {
            break;
        }
        if payload.is_empty() {
            continue;
        }
        if payload[0] == SideBand::PackfileData.value() {
            unwrapped.extend_from_slice(&payload[1..]);
        } else {
            looks_side_banded = false;
            break;
        }
    }

    let report_bytes = if looks_side_banded && !unwrapped.is_empty() {
        unwrapped.freeze()
    } else {
        body
    };

    let mut cursor = report_bytes;
    let (consumed, unpack_line) = read_pkt_line(&mut cursor);
    if consumed == 0 {
        return Err(GitError::InvalidResponse(
            "empty report-status response".to_string(),
        ));
    }
    let unpack_text = String::from_utf8_lossy(&unpack_line);
    if unpack_text.trim_end() != "unpack ok" {
        return Err(GitError::ServerError(format!(
            "unpack failed: {}",
            unpack_text.trim_end()
        )));
    }

    let mut results = Vec::new();
    loop {
        let (consumed, line) = read_pkt_line(&mut cursor);
        if consumed == 0 {
            break;
        }
        if line.is_empty() {
            continue;
        }
        let text = String::from_utf8_lossy(&line).trim_end().to_string();
        if let Some(rest) = text.strip_prefix("ok ") {
            results.push(PushResult {
                ref_name: rest.to_string(),
                ok: true,
                message: None,
            });
        } else if let Some(rest) = text.strip_prefix("ng ") {
            let (name, msg) = rest.split_once(' ').unwrap_or((rest, ""));
            results.push(PushResult {
                ref_name: name.to_string(),
                ok: false,
                message: Some(msg.to_string()),
            });
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ref_advertisement_extracts_refs_and_capabilities() {
        let mut raw = BytesMut::new();
        add_pkt_line_string(&mut raw, "# service=git-upload-pack\n".to_string());
        raw.extend_from_slice(PKT_LINE_END_MARKER);
        add_pkt_line_string(
            &mut raw,
            format!(
                "{} HEAD\0side-band-64k ofs-delta symref=HEAD:refs/heads/main\n",
                "a".repeat(40)
            ),
        );
        add_pkt_line_string(&mut raw, format!("{} refs/heads/main\n", "a".repeat(40)));
        raw.extend_from_slice(PKT_LINE_END_MARKER);

        let advertisement =
            parse_ref_advertisement(raw.freeze(), ServiceType::UploadPack).unwrap();
        assert_eq!(advertisement.refs.len(), 2);
        assert_eq!(advertisement.refs[0].name, "HEAD");
        assert_eq!(advertisement.head_target.as_deref(), Some("refs/heads/main"));
        assert!(
            advertisement
                .capabilities
                .iter()
                .any(|c| matches!(c, Capability::SideBand64k))
        );
    }

    #[test]
    fn demux_plain_pack_response_passes_bytes_through() {
        let mut body = BytesMut::new();
        body.extend_from_slice(b"PACK");
        body.extend_from_slice(&[0, 0, 0, 2]);
        let pack = demux_upload_pack_response(body.clone().freeze(), false, |_| {}).unwrap();
        assert_eq!(pack, body.to_vec());
    }

    #[test]
    fn demux_side_band_response_strips_channel_and_collects_progress() {
        let mut raw = BytesMut::new();
        add_pkt_line_string(&mut raw, "NAK\n".to_string());

        let mut pack_payload = vec![SideBand::PackfileData.value()];
        pack_payload.extend_from_slice(b"PACKDATA");
        add_pkt_line_string(&mut raw, String::from_utf8_lossy(&pack_payload).to_string());

        let mut progress_payload = vec![SideBand::ProgressInfo.value()];
        progress_payload.extend_from_slice(b"counting objects\n");
        add_pkt_line_string(
            &mut raw,
            String::from_utf8_lossy(&progress_payload).to_string(),
        );
        raw.extend_from_slice(PKT_LINE_END_MARKER);

        let mut saw_progress = false;
        let pack =
            demux_upload_pack_response(raw.freeze(), true, |_| saw_progress = true).unwrap();
        assert_eq!(pack, b"PACKDATA");
        assert!(saw_progress);
    }

    #[test]
    fn parse_report_status_reports_per_ref_outcomes() {
        let mut raw = BytesMut::new();
        add_pkt_line_string(&mut raw, "unpack ok\n".to_string());
        add_pkt_line_string(&mut raw, "ok refs/heads/main\n".to_string());
        add_pkt_line_string(&mut raw, "ng refs/heads/dev non-fast-forward\n".to_string());
        raw.extend_from_slice(PKT_LINE_END_MARKER);

        let results = parse_report_status(raw.freeze()).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].ok);
        assert!(!results[1].ok);
        assert_eq!(results[1].message.as_deref(), Some("non-fast-forward"));
    }
}
